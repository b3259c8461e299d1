use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between frames in the serialized resume key.
pub const PATH_SEPARATOR: char = '.';
/// Separator between loop name and iteration inside one frame.
pub const FRAME_SEPARATOR: char = ',';

/// One `(loopName, iteration)` frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathFrame {
    pub loop_name: String,
    pub iteration: usize,
}

/// Coordinate of the active nested-loop iteration.
///
/// Empty at flow start. Persistent: every operation returns a new path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepExecutionPath {
    frames: Vec<PathFrame>,
}

impl StepExecutionPath {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn loop_iteration(&self, loop_name: impl Into<String>, iteration: usize) -> Self {
        let mut frames = self.frames.clone();
        frames.push(PathFrame {
            loop_name: loop_name.into(),
            iteration,
        });
        Self { frames }
    }

    pub fn remove_last(&self) -> Self {
        let mut frames = self.frames.clone();
        frames.pop();
        Self { frames }
    }

    pub fn frames(&self) -> &[PathFrame] {
        &self.frames
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Parse a resume key produced by `to_string`. Loop names never contain
    /// either separator; `Action` parsing rejects them.
    pub fn parse(key: &str) -> Option<Self> {
        if key.is_empty() {
            return Some(Self::empty());
        }
        key.split(PATH_SEPARATOR)
            .map(|frame| {
                let (name, iteration) = frame.rsplit_once(FRAME_SEPARATOR)?;
                Some(PathFrame {
                    loop_name: name.to_string(),
                    iteration: iteration.parse().ok()?,
                })
            })
            .collect::<Option<Vec<_>>>()
            .map(|frames| Self { frames })
    }

    /// True when `key` addresses this path or a frame nested below it.
    pub fn addresses(&self, key: &str) -> bool {
        let own = self.to_string();
        key == own
            || key
                .strip_prefix(own.as_str())
                .is_some_and(|rest| rest.starts_with(PATH_SEPARATOR))
    }
}

impl fmt::Display for StepExecutionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, frame) in self.frames.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", PATH_SEPARATOR)?;
            }
            write!(f, "{}{}{}", frame.loop_name, FRAME_SEPARATOR, frame.iteration)?;
        }
        Ok(())
    }
}
