use crate::utils::time::Span;

#[derive(Debug, Fail)]
pub enum Error {
    #[fail(display = "Interval spans must be positive, got {}.", _0)]
    InvalidSpan(Span),
}

pub type Result<T> = ::std::result::Result<T, Error>;
