//! Canonical string encoding of call stacks
//!
//! Frames are rendered as `module:file:line:function` and joined with `;`,
//! root first. This is the "collapsed stack" format flame graph tools read.
//!
//! Known limitation: `:` is not escaped, so a module or function name that
//! itself contains `:` (every qualified Rust path does) can in principle make
//! two different frames render identically. Stack boundaries stay unambiguous
//! because fields containing `;` are rejected.

use std::borrow::Borrow;
use std::fmt::{self, Write};

use crate::error::{Result, SamplerError};
use crate::frame::{Frame, Sample};

/// Separator between frames
pub const FRAME_DELIMITER: char = ';';

/// Separator between the fields of one frame
pub const FIELD_DELIMITER: char = ':';

/// Canonical identity of a sampled call stack
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StackKey(String);

impl StackKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of frames encoded in this key
    pub fn depth(&self) -> usize {
        if self.0.is_empty() {
            0
        } else {
            self.0.split(FRAME_DELIMITER).count()
        }
    }
}

impl fmt::Display for StackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StackKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for StackKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<StackKey> for String {
    fn from(key: StackKey) -> Self {
        key.0
    }
}

/// Turns samples into [`StackKey`]s
pub struct StackEncoder;

impl StackEncoder {
    /// Encode a sample, outermost frame first
    ///
    /// An empty sample encodes to the empty key.
    ///
    /// # Example
    /// ```
    /// use stacksampler::encoder::StackEncoder;
    /// use stacksampler::frame::{Frame, Sample};
    ///
    /// let sample = Sample::new(vec![Frame::new("m", "f.py", 10, "g")]);
    /// assert_eq!(StackEncoder::encode(&sample).unwrap().as_str(), "m:f.py:10:g");
    /// ```
    pub fn encode(sample: &Sample) -> Result<StackKey> {
        let frames = sample.frames();
        let mut key = String::with_capacity(encoded_len_hint(frames));

        for (i, frame) in frames.iter().enumerate() {
            check_field(&frame.module)?;
            check_field(&frame.file)?;
            check_field(&frame.function)?;

            if i > 0 {
                key.push(FRAME_DELIMITER);
            }
            // Writing to a String cannot fail
            let _ = write!(
                key,
                "{}{sep}{}{sep}{}{sep}{}",
                frame.module,
                frame.file,
                frame.line,
                frame.function,
                sep = FIELD_DELIMITER
            );
        }

        Ok(StackKey(key))
    }
}

/// Fields may not contain the frame delimiter or break a report line
fn check_field(field: &str) -> Result<()> {
    if let Some(bad) = field
        .chars()
        .find(|c| *c == FRAME_DELIMITER || *c == '\n' || *c == '\r')
    {
        return Err(SamplerError::EncodingFailure(format!(
            "frame field {:?} contains reserved character {:?}",
            field, bad
        )));
    }
    Ok(())
}

fn encoded_len_hint(frames: &[Frame]) -> usize {
    frames
        .iter()
        .map(|f| f.module.len() + f.file.len() + f.function.len() + 10)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(module: &str, file: &str, line: u32, function: &str) -> Frame {
        Frame::new(module, file, line, function)
    }

    #[test]
    fn test_encode_empty_sample() {
        let key = StackEncoder::encode(&Sample::default()).unwrap();
        assert_eq!(key.as_str(), "");
        assert!(key.is_empty());
        assert_eq!(key.depth(), 0);
    }

    #[test]
    fn test_encode_single_frame() {
        let sample = Sample::new(vec![frame("m", "f.py", 10, "g")]);
        assert_eq!(StackEncoder::encode(&sample).unwrap().as_str(), "m:f.py:10:g");
    }

    #[test]
    fn test_encode_root_first() {
        let sample = Sample::new(vec![
            frame("__main__", "example.py", 31, "<module>"),
            frame("__main__", "example.py", 21, "main"),
            frame("__main__", "example.py", 6, "some_function"),
        ]);
        let key = StackEncoder::encode(&sample).unwrap();
        assert_eq!(
            key.as_str(),
            concat!(
                "__main__:example.py:31:<module>;",
                "__main__:example.py:21:main;",
                "__main__:example.py:6:some_function"
            )
        );
        assert_eq!(key.depth(), 3);
    }

    #[test]
    fn test_identical_stacks_identical_keys() {
        let a = Sample::new(vec![
            frame("app", "lib.rs", 1, "a"),
            frame("app", "lib.rs", 2, "b"),
        ]);
        let b = a.clone();
        assert_eq!(
            StackEncoder::encode(&a).unwrap(),
            StackEncoder::encode(&b).unwrap()
        );
    }

    #[test]
    fn test_any_field_change_changes_key() {
        let base = frame("app", "lib.rs", 7, "work");
        let variants = [
            frame("other", "lib.rs", 7, "work"),
            frame("app", "main.rs", 7, "work"),
            frame("app", "lib.rs", 8, "work"),
            frame("app", "lib.rs", 7, "rest"),
        ];
        let base_key = StackEncoder::encode(&Sample::new(vec![base])).unwrap();
        for variant in variants {
            let key = StackEncoder::encode(&Sample::new(vec![variant])).unwrap();
            assert_ne!(key, base_key);
        }
    }

    #[test]
    fn test_frame_delimiter_in_field_is_rejected() {
        let sample = Sample::new(vec![frame("app", "lib.rs", 1, "<[u8; 4] as Foo>::bar")]);
        let err = StackEncoder::encode(&sample).unwrap_err();
        assert!(matches!(err, SamplerError::EncodingFailure(_)));
    }

    #[test]
    fn test_newline_in_field_is_rejected() {
        let sample = Sample::new(vec![frame("app", "lib\n.rs", 1, "f")]);
        assert!(StackEncoder::encode(&sample).is_err());
    }

    #[test]
    fn test_stack_key_borrows_as_str() {
        use std::collections::HashMap;
        let key = StackEncoder::encode(&Sample::new(vec![frame("m", "f", 1, "g")])).unwrap();
        let mut map = HashMap::new();
        map.insert(key, 1u64);
        assert_eq!(map.get("m:f:1:g"), Some(&1));
    }
}
