//! Pure path normalization
//!
//! Used by config validation to prove that the runtime and log
//! directories are not nested inside the public document root. The check
//! must not touch the disk (the directories may not exist yet), so this
//! collapses `.` and `..` segments lexically.

/// Normalizes a path without accessing the disk.
///
/// Backslashes are treated as separators, empty and `.` segments are
/// dropped, and `..` pops the previous segment. The result always starts
/// with `/` and never ends with one.
pub fn normalize_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let mut normalized: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }

    format!("/{}", normalized.join("/"))
}

/// Whether `candidate` is `root` itself or a path nested under it.
pub fn is_within(candidate: &str, root: &str) -> bool {
    let candidate = normalize_path(candidate);
    let root = normalize_path(root);

    candidate == root || candidate.starts_with(&format!("{root}/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_dot_segments() {
        assert_eq!(normalize_path("/var/www/./public"), "/var/www/public");
        assert_eq!(normalize_path("/var/www/public/../runtime"), "/var/www/runtime");
        assert_eq!(normalize_path("a/b/../../c"), "/c");
    }

    #[test]
    fn treats_backslashes_as_separators() {
        assert_eq!(normalize_path("C:\\www\\public\\..\\runtime"), "/C:/www/runtime");
    }

    #[test]
    fn nesting_check() {
        assert!(is_within("/srv/app/public/data", "/srv/app/public"));
        assert!(is_within("/srv/app/public", "/srv/app/public"));
        assert!(!is_within("/srv/app/public/../runtime", "/srv/app/public"));
        assert!(!is_within("/srv/app/publicdata", "/srv/app/public"));
    }
}
