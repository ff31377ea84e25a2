//! Memory admission.
//!
//! Subsets are pure descriptors, so the engine can price an operation before
//! any buffer exists: `requested = product(shape) * sizeof(element type)`.
//! The request is admitted when it stays under
//! `min(configured limit, free ram + free swap)`, otherwise it fails with
//! [`MemoryError::LimitExceeded`] — before a single byte is allocated.

use thiserror::Error;

use crate::schema::ElementType;

/// A refused memory admission.
#[derive(Clone, Debug, Error)]
#[error(
    "cannot allocate {requested} bytes for shape {shape:?} of {element_type}; \
     the current limit is {limit} bytes — reduce the subset or raise memory_limit"
)]
pub struct MemoryError {
    /// Requested bytes.
    pub requested: u64,
    /// The shape priced.
    pub shape: Vec<u64>,
    /// The element type priced.
    pub element_type: ElementType,
    /// The effective limit in bytes.
    pub limit: u64,
}

/// An unparsable memory limit.
#[derive(Clone, Debug, Error)]
#[error(
    "invalid memory limit {0:?}; expected bytes or \"<int>[KMGT]\", e.g. \"8G\" or \"512M\""
)]
pub struct MemoryLimitParseError(pub String);

/// A memory limit in bytes; [`MemoryLimit::unlimited`] by default.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MemoryLimit(u64);

impl Default for MemoryLimit {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl MemoryLimit {
    /// No configured limit; only the machine's free memory gates admission.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self(u64::MAX)
    }

    /// A limit of `bytes`.
    #[must_use]
    pub const fn bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    /// The limit in bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> u64 {
        self.0
    }
}

impl From<u64> for MemoryLimit {
    fn from(bytes: u64) -> Self {
        Self(bytes)
    }
}

impl std::str::FromStr for MemoryLimit {
    type Err = MemoryLimitParseError;

    /// Parse a human-readable limit: plain bytes or `<int>[KMGT]`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let error = || MemoryLimitParseError(raw.to_string());
        let raw = raw.trim();
        if raw.is_empty() || !raw.is_ascii() {
            return Err(error());
        }
        if let Ok(bytes) = raw.parse::<u64>() {
            return Ok(Self(bytes));
        }
        let (digits, unit) = raw.split_at(raw.len() - 1);
        let multiplier: u64 = match unit.chars().next().map(|c| c.to_ascii_lowercase()) {
            Some('k') => 1 << 10,
            Some('m') => 1 << 20,
            Some('g') => 1 << 30,
            Some('t') => 1 << 40,
            _ => return Err(error()),
        };
        let value: u64 = digits.trim().parse().map_err(|_| error())?;
        value.checked_mul(multiplier).map(Self).ok_or_else(error)
    }
}

/// Free ram plus free swap, in bytes.
#[cfg(target_os = "linux")]
#[must_use]
pub fn free_memory() -> u64 {
    let mut info: libc::sysinfo = unsafe { std::mem::zeroed() };
    if unsafe { libc::sysinfo(&mut info) } != 0 {
        return u64::MAX;
    }
    let unit = u64::from(info.mem_unit.max(1));
    (info.freeram as u64).saturating_add(info.freeswap as u64) * unit
}

/// Free ram plus free swap, in bytes. Unprobed on this platform.
#[cfg(not(target_os = "linux"))]
#[must_use]
pub fn free_memory() -> u64 {
    u64::MAX
}

/// Admit or refuse an allocation of `shape` × `element_type`.
///
/// # Errors
/// Returns [`MemoryError`] if the request exceeds
/// `min(limit, free ram + free swap)`.
pub fn check_memory(
    shape: &[u64],
    element_type: ElementType,
    limit: MemoryLimit,
) -> Result<(), MemoryError> {
    let cells = shape.iter().product::<u64>();
    let requested = cells.saturating_mul(element_type.size() as u64);
    let effective = std::cmp::min(limit.as_bytes(), free_memory());
    if requested > effective {
        return Err(MemoryError {
            requested,
            shape: shape.to_vec(),
            element_type,
            limit: effective,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_parsing() {
        assert_eq!("1024".parse::<MemoryLimit>().unwrap().as_bytes(), 1024);
        assert_eq!("1K".parse::<MemoryLimit>().unwrap().as_bytes(), 1024);
        assert_eq!(
            "512m".parse::<MemoryLimit>().unwrap().as_bytes(),
            512 << 20
        );
        assert_eq!("8G".parse::<MemoryLimit>().unwrap().as_bytes(), 8 << 30);
        assert_eq!("2T".parse::<MemoryLimit>().unwrap().as_bytes(), 2 << 40);
        assert!("".parse::<MemoryLimit>().is_err());
        assert!("12Q".parse::<MemoryLimit>().is_err());
        assert!("G".parse::<MemoryLimit>().is_err());
    }

    #[test]
    fn admission() {
        // 10^6 float64 cells exceed a 1M limit.
        let limit = "1M".parse::<MemoryLimit>().unwrap();
        let result = check_memory(&[100, 100, 100], ElementType::F64, limit);
        assert!(result.is_err());
        assert!(check_memory(&[100, 100], ElementType::F64, limit).is_ok());
        assert!(check_memory(&[100, 100, 100], ElementType::F64, MemoryLimit::unlimited()).is_ok());
    }
}
