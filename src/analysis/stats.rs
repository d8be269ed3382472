use crate::pr::ChangedFile;

/// Line counts summed over every file in a pull request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub additions: u64,
    pub deletions: u64,
    pub changes: u64,
}

impl DiffStats {
    /// Sum additions, deletions and changes across `files`.
    ///
    /// Every file is visited exactly once; an empty slice yields all zeros.
    pub fn aggregate(files: &[ChangedFile]) -> DiffStats {
        files.iter().fold(DiffStats::default(), |acc, file| acc.add(file))
    }

    fn add(self, file: &ChangedFile) -> DiffStats {
        DiffStats {
            additions: self.additions + file.additions,
            deletions: self.deletions + file.deletions,
            changes: self.changes + file.changes,
        }
    }
}
