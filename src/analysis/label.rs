use crate::pr::ChangedFile;

/// Content-type label applied to a pull request for each changed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    Javascript,
    Typescript,
    Yaml,
    Markdown,
    Other,
}

impl Label {
    /// Map a file extension to its label. Matching ignores case; a missing
    /// or unrecognized extension maps to `Other`.
    pub fn from_extension(extension: Option<&str>) -> Label {
        let Some(extension) = extension else {
            return Label::Other;
        };
        match extension.to_ascii_lowercase().as_str() {
            "js" => Label::Javascript,
            "ts" => Label::Typescript,
            "yaml" => Label::Yaml,
            "md" => Label::Markdown,
            _ => Label::Other,
        }
    }

    pub fn for_filename(filename: &str) -> Label {
        Label::from_extension(extension(filename))
    }

    /// The label name as it appears on GitHub.
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Javascript => "javascript",
            Label::Typescript => "typescript",
            Label::Yaml => "yaml",
            Label::Markdown => "markdown",
            Label::Other => "other",
        }
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything after the final `.` in `filename`, or `None` when there is no `.`.
///
/// The whole filename is searched, path separators included, so
/// `"a.b.ts"` yields `"ts"` and `"notes."` yields `""`.
pub fn extension(filename: &str) -> Option<&str> {
    filename.rsplit_once('.').map(|(_, ext)| ext)
}

/// A changed file paired with the label derived from its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub filename: String,
    pub label: Label,
}

impl Classification {
    pub fn of(file: &ChangedFile) -> Self {
        Self {
            filename: file.filename.clone(),
            label: Label::for_filename(&file.filename),
        }
    }
}

/// One classification per file, in input order. Duplicate filenames are kept.
pub fn classify(files: &[ChangedFile]) -> Vec<Classification> {
    files.iter().map(Classification::of).collect()
}
