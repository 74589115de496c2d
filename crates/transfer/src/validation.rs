use std::path::{Component, Path};

use crate::TransferError;
use crate::session::SESSION_ID_BYTES;

/// Suffix of an artifact while it is being written.
pub(crate) const PARTIAL_SUFFIX: &str = ".partial";

/// Longest file name most filesystems allow, in bytes.
const MAX_PATH_COMPONENT: usize = 255;

/// Longest filename accepted, in bytes.
///
/// Leaves room for the `<sessionId>_` prefix and the partial suffix so the
/// artifact name stays within one path component.
pub(crate) const MAX_FILENAME_LEN: usize =
    MAX_PATH_COMPONENT - (SESSION_ID_BYTES * 2 + 1) - PARTIAL_SUFFIX.len();

/// Validates a client-supplied filename and returns it trimmed.
///
/// The artifact is written as `<root>/<sessionId>_<filename>`, so the name
/// must be a single plain path component.
///
/// Rejects:
/// - Empty or whitespace-only names
/// - Names containing `/`, `\` or NUL
/// - `.` and `..`
/// - Absolute paths and Windows prefixes (`C:`)
pub fn sanitize_filename(filename: &str) -> Result<String, TransferError> {
    let name = filename.trim();
    if name.is_empty() {
        return Err(TransferError::InvalidRequest("filename is empty".into()));
    }
    if name.len() > MAX_FILENAME_LEN {
        return Err(TransferError::InvalidRequest(format!(
            "filename longer than {MAX_FILENAME_LEN} bytes"
        )));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(TransferError::InvalidRequest(format!(
            "filename must not contain path separators: {name}"
        )));
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) if part == name => Ok(name.to_string()),
        _ => Err(TransferError::InvalidRequest(format!(
            "filename is not a plain file name: {name}"
        ))),
    }
}
