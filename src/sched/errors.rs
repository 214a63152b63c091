#[derive(Debug, Fail)]
pub enum Error {
    #[fail(display = "run_cycle was entered while a cycle is already in progress.")]
    CycleInProgress,
}

pub type Result<T> = ::std::result::Result<T, Error>;
