#[derive(Debug, Fail)]
pub enum Error {
    #[fail(display = "The cell is already full; an ivar is single-assignment.")]
    AlreadyFull,
    #[fail(display = "The deferred has not been determined yet.")]
    NotDetermined,
}

pub type Result<T> = ::std::result::Result<T, Error>;
