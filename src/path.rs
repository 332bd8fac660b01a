//! Field addressing.

use std::fmt;
use std::str::FromStr;

use crate::error::PathError;

/// Sequence of field numbers leading from the document root to a field.
///
/// The root itself is the empty path. Its textual form is `0`, which is also accepted (and
/// dropped) as the first segment of any parsed path, so `0.1.2` and `1.2` are the same path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path(Vec<u32>);

impl Path
{
    /// The root path.
    pub fn root() -> Self
    {
        Path(vec![])
    }

    /// True for the root path.
    pub fn is_root(&self) -> bool
    {
        self.0.is_empty()
    }

    /// Number of segments.
    pub fn len(&self) -> usize
    {
        self.0.len()
    }

    /// Same as `is_root`.
    pub fn is_empty(&self) -> bool
    {
        self.0.is_empty()
    }

    /// Field numbers from the root.
    pub fn numbers(&self) -> &[u32]
    {
        &self.0
    }

    /// Last field number, `None` for the root.
    pub fn last(&self) -> Option<u32>
    {
        self.0.last().copied()
    }

    /// Path of the enclosing message, `None` for the root.
    pub fn parent(&self) -> Option<Path>
    {
        self.0.split_last().map(|(_, rest)| Path(rest.to_vec()))
    }

    /// Path of field `number` within this path.
    pub fn child(&self, number: u32) -> Path
    {
        let mut numbers = Vec::with_capacity(self.0.len() + 1);
        numbers.extend_from_slice(&self.0);
        numbers.push(number);
        Path(numbers)
    }

    /// This path followed by `other`.
    pub fn join(&self, other: &Path) -> Path
    {
        let mut numbers = self.0.clone();
        numbers.extend_from_slice(&other.0);
        Path(numbers)
    }

    /// True, if `prefix` is a leading part of this path.
    pub fn starts_with(&self, prefix: &Path) -> bool
    {
        self.0.starts_with(&prefix.0)
    }

    /// True, if `suffix` is a trailing part of this path.
    pub fn ends_with(&self, suffix: &Path) -> bool
    {
        self.0.ends_with(&suffix.0)
    }

    /// The rest of the path after `prefix`, if it starts with it.
    pub fn strip_prefix(&self, prefix: &Path) -> Option<Path>
    {
        self.0.strip_prefix(&prefix.0[..]).map(|rest| Path(rest.to_vec()))
    }
}

impl From<Vec<u32>> for Path
{
    fn from(numbers: Vec<u32>) -> Self
    {
        Path(numbers)
    }
}

impl From<&[u32]> for Path
{
    fn from(numbers: &[u32]) -> Self
    {
        Path(numbers.to_vec())
    }
}

impl FromStr for Path
{
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Path::root());
        }

        let mut numbers = s
            .split('.')
            .map(|segment| {
                segment
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| PathError::InvalidSegment {
                        segment: segment.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if numbers.first() == Some(&0) {
            numbers.remove(0);
        }

        Ok(Path(numbers))
    }
}

impl fmt::Display for Path
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        if self.0.is_empty() {
            return f.write_str("0");
        }

        for (idx, number) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", number)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test
{
    use super::*;

    #[test]
    fn parse_and_display()
    {
        let path: Path = "1.2.4".parse().unwrap();
        assert_eq!(path.numbers(), &[1, 2, 4]);
        assert_eq!(path.to_string(), "1.2.4");

        assert_eq!("0.1.2".parse::<Path>().unwrap(), Path::from(vec![1, 2]));
        assert_eq!("0".parse::<Path>().unwrap(), Path::root());
        assert_eq!("".parse::<Path>().unwrap(), Path::root());
        assert_eq!(Path::root().to_string(), "0");
    }

    #[test]
    fn invalid_segment()
    {
        assert_eq!(
            "1.x.3".parse::<Path>(),
            Err(PathError::InvalidSegment {
                segment: "x".to_string()
            })
        );
        assert!("1..3".parse::<Path>().is_err());
        assert!("-1".parse::<Path>().is_err());
    }

    #[test]
    fn prefix_operations()
    {
        let path = Path::from(vec![1, 3, 5]);
        let prefix = Path::from(vec![1, 3]);

        assert!(path.starts_with(&prefix));
        assert!(path.ends_with(&Path::from(vec![3, 5])));
        assert_eq!(path.strip_prefix(&prefix), Some(Path::from(vec![5])));
        assert_eq!(path.strip_prefix(&Path::from(vec![2])), None);
        assert_eq!(prefix.join(&Path::from(vec![5])), path);
        assert_eq!(prefix.child(5), path);
        assert_eq!(path.parent(), Some(prefix));
        assert_eq!(Path::root().parent(), None);
        assert_eq!(path.last(), Some(5));
    }
}
