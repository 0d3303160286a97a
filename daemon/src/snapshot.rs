use serde::Deserialize;
use std::collections::HashSet;

/// Column layout of a process listing.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// `ps -A`: `PID TTY TIME CMD`, name in the fourth column.
    Posix,
    /// `tasklist`: image name in the first column.
    Windows,
}

impl Platform {
    /// The platform this binary was built for.
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Posix
        }
    }

    /// Zero-based index of the whitespace-delimited token holding the process name.
    pub fn name_field(self) -> usize {
        match self {
            Platform::Posix => 3,
            Platform::Windows => 0,
        }
    }

    /// Lines preceding the first process row in the default listing command's output.
    /// `tasklist` prints a blank line, a header and a `====` rule.
    pub fn default_header_lines(self) -> usize {
        match self {
            Platform::Posix => 1,
            Platform::Windows => 3,
        }
    }

    pub fn default_command(self) -> Vec<String> {
        match self {
            Platform::Posix => vec!["ps".to_string(), "-A".to_string()],
            Platform::Windows => vec!["tasklist".to_string()],
        }
    }
}

/// Shape of a raw listing: where the name lives and how many lines to skip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListingFormat {
    pub platform: Platform,
    pub header_lines: usize,
}

impl ListingFormat {
    pub fn for_platform(platform: Platform) -> Self {
        Self {
            platform,
            header_lines: platform.default_header_lines(),
        }
    }
}

/// Lowercase identifiers of the processes observed during one poll tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSnapshot {
    names: HashSet<String>,
}

impl ProcessSnapshot {
    /// `name` is expected lowercase, as stored by [`crate::status::AppGroup`].
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for ProcessSnapshot {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            names: iter
                .into_iter()
                .map(|s| s.as_ref().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }
}

/// Turns raw process-listing text into a snapshot.
///
/// Header lines are skipped, every other line is split on whitespace and the
/// platform's name column is lowercased into the set. Lines too short to hold
/// that column are absent data and are dropped without error.
pub fn normalize(raw: &str, format: ListingFormat) -> ProcessSnapshot {
    let field = format.platform.name_field();
    raw.lines()
        .skip(format.header_lines)
        .filter_map(|line| line.split_whitespace().nth(field))
        .collect()
}
