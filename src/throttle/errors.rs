#[derive(Debug, Fail)]
pub enum Error {
    #[fail(display = "The throttle was killed before the job could run.")]
    Aborted,
}

pub type Result<T> = ::std::result::Result<T, Error>;
