use crate::utils::time::Time;

#[derive(Debug, Fail)]
pub enum Error {
    #[fail(
        display = "Alarm time {} is beyond the wheel horizon {}.",
        _0, _1
    )]
    OutOfRange(Time, Time),
    #[fail(display = "Alarm handle is stale; the alarm already fired or was removed.")]
    StaleAlarm,
}

pub type Result<T> = ::std::result::Result<T, Error>;
