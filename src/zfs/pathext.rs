use crate::zfs::ValidationResult;

/// Helpers over `pool/dataset[@snapshot|#bookmark]` names.
pub trait PathExt {
    fn get_pool(&self) -> Option<&str>;
    /// Dataset part of the name, without snapshot or bookmark.
    fn get_dataset(&self) -> &str;
    fn get_snapshot(&self) -> Option<&str>;
    fn get_bookmark(&self) -> Option<&str>;
    /// Parent dataset. `None` for the root dataset of a pool.
    fn get_parent(&self) -> Option<&str>;

    fn is_snapshot(&self) -> bool { self.get_snapshot().is_some() }
    fn is_bookmark(&self) -> bool { self.get_bookmark().is_some() }
    fn is_volume_or_dataset(&self) -> bool { !self.is_bookmark() && !self.is_snapshot() }

    /// Levels below the pool root: `tank` is 0, `tank/a/b` is 2.
    fn depth(&self) -> usize { self.get_dataset().matches('/').count() }

    /// Strictly below `ancestor`.
    fn is_descendant_of(&self, ancestor: &str) -> bool {
        let dataset = self.get_dataset();
        dataset.len() > ancestor.len()
            && dataset.starts_with(ancestor)
            && dataset.as_bytes()[ancestor.len()] == b'/'
    }

    fn is_valid(&self) -> bool { self.validate().is_ok() }

    fn validate(&self) -> ValidationResult;
}

impl PathExt for str {
    fn get_pool(&self) -> Option<&str> {
        if self.starts_with('/') || self.is_empty() {
            return None;
        }
        self.get_dataset().split('/').next().filter(|pool| !pool.is_empty())
    }

    fn get_dataset(&self) -> &str {
        let last = self.rfind('/').map_or(0, |idx| idx + 1);
        match self[last..].find(|c: char| c == '@' || c == '#') {
            Some(idx) => &self[..last + idx],
            None => self,
        }
    }

    fn get_snapshot(&self) -> Option<&str> {
        let last = self.rsplit('/').next()?;
        last.find('@').map(|idx| &last[idx + 1..])
    }

    fn get_bookmark(&self) -> Option<&str> {
        let last = self.rsplit('/').next()?;
        last.find('#').map(|idx| &last[idx + 1..])
    }

    fn get_parent(&self) -> Option<&str> {
        let dataset = self.get_dataset();
        dataset.rfind('/').map(|idx| &dataset[..idx])
    }

    fn validate(&self) -> ValidationResult { crate::zfs::validators::validate_name(self) }
}

impl PathExt for String {
    fn get_pool(&self) -> Option<&str> { self.as_str().get_pool() }

    fn get_dataset(&self) -> &str { self.as_str().get_dataset() }

    fn get_snapshot(&self) -> Option<&str> { self.as_str().get_snapshot() }

    fn get_bookmark(&self) -> Option<&str> { self.as_str().get_bookmark() }

    fn get_parent(&self) -> Option<&str> { self.as_str().get_parent() }

    fn validate(&self) -> ValidationResult { self.as_str().validate() }
}
