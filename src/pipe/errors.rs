#[derive(Debug, Fail)]
pub enum Error {
    #[fail(display = "The pipe is closed.")]
    Closed,
}

pub type Result<T> = ::std::result::Result<T, Error>;
