mod file;
mod revision;
mod tree;
mod version;

pub use self::file::{LocalFile, LocalKind};
pub(crate) use self::file::FileRow;
pub use self::revision::Revision;
pub(crate) use self::revision::RevisionRow;
pub use self::tree::LocalTree;
pub use self::version::ExportedVersion;
pub(crate) use self::version::VersionRow;

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use time::{Duration, UtcDateTime};

/// Drop sub-microsecond precision, which the catalog doesn't store.
///
/// Anything compared against a stored timestamp has to go through this
/// first, or it would never compare equal after a round trip.
pub fn truncate_to_micros(t: UtcDateTime) -> UtcDateTime {
    t - Duration::nanoseconds(i64::from(t.nanosecond() % 1_000))
}

pub(crate) fn to_micros(t: UtcDateTime) -> Result<i64> {
    i64::try_from(t.unix_timestamp_nanos() / 1_000).or_raise(|| ErrorKind::InvalidData("timestamp"))
}

pub(crate) fn from_micros(micros: i64) -> Result<UtcDateTime> {
    UtcDateTime::from_unix_timestamp_nanos(i128::from(micros) * 1_000).or_raise(|| ErrorKind::InvalidData("timestamp"))
}

pub(crate) fn opt_to_micros(t: Option<UtcDateTime>) -> Result<Option<i64>> {
    t.map(to_micros).transpose()
}

pub(crate) fn opt_from_micros(micros: Option<i64>) -> Result<Option<UtcDateTime>> {
    micros.map(from_micros).transpose()
}
