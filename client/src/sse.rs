use common::data::ProgressSnapshot;

/// Reads one line of a server-sent event stream. Returns `None` for lines
/// that carry no data (blank separators, comments, other fields).
pub fn parse_line(line: &str) -> Option<serde_json::Result<ProgressSnapshot>> {
    let data = line.trim_end_matches(['\r', '\n']).strip_prefix("data:")?;
    Some(serde_json::from_str(data.trim_start()))
}
