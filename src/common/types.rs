//! Shared types used across the application.

use std::fmt;

/// One of the two bridged platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Matrix,
    Mattermost,
}

impl Side {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Matrix => "matrix",
            Self::Mattermost => "mattermost",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Origin side of an inbound event.
///
/// Each direction owns its own relay lane, so events are totally ordered
/// within a direction and unordered across directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Mattermost-origin events relayed into Matrix.
    MattermostToMatrix,
    /// Matrix-origin events relayed into Mattermost.
    MatrixToMattermost,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MattermostToMatrix => f.write_str("mattermost -> matrix"),
            Self::MatrixToMattermost => f.write_str("matrix -> mattermost"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Side::Matrix.to_string(), "matrix");
        assert_eq!(
            Direction::MatrixToMattermost.to_string(),
            "matrix -> mattermost"
        );
    }
}
