//! Per-satellite trace replay (§3 "Trace", §9 "Trace replay with
//! seek/tell").
//!
//! The trace is read strictly forward; the only seek this reader
//! exposes is a single one-line rewind, used when the epoch handler
//! reads one line past the current epoch boundary. No arbitrary seeks
//! are possible through this API.

use std::io::{BufRead, BufReader, Read};

use chrono::NaiveDateTime;

use crate::error::{CoreError, CoreResult};

/// One parsed `[Requests Records]` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceRecord {
    /// Seconds since the emulation epoch (trace time plus the
    /// per-satellite offset computed once at CONF).
    pub arrival_time: i64,
    /// The user who issued this batch of requests.
    pub user_id: String,
    /// Uplink latency component, in whatever unit the trace uses.
    pub latency_uplink: i64,
    /// Downlink latency component.
    pub latency_downlink: i64,
    /// `(object_id, size)` pairs requested in this batch.
    pub objects: Vec<(String, u64)>,
}

/// A forward-only reader over a satellite's trace file with exactly
/// one line of rewind.
pub struct TraceReader<R> {
    lines: BufReader<R>,
    pending_rewind: Option<String>,
    /// Offset applied to every parsed timestamp (§3 "a fixed offset is
    /// computed once at configuration").
    epoch_offset: i64,
}

impl<R: Read> TraceReader<R> {
    /// Wraps `reader`, applying `epoch_offset` to every parsed
    /// timestamp.
    pub fn new(reader: R, epoch_offset: i64) -> Self {
        Self {
            lines: BufReader::new(reader),
            pending_rewind: None,
            epoch_offset,
        }
    }

    /// Reads and parses the next `[Requests Records]` line, skipping
    /// (and debug-logging) any line that isn't one, per the
    /// `TraceCorrupt` policy in §7: malformed lines are skipped, not
    /// fatal.
    ///
    /// Returns `Ok(None)` at end of file.
    pub fn next_record(&mut self) -> CoreResult<Option<TraceRecord>> {
        Ok(self.next_record_with_line()?.map(|(_, record)| record))
    }

    /// Same as [`TraceReader::next_record`] but also returns the raw
    /// line it was parsed from, so a caller that may need to
    /// [`rewind_one_line`](Self::rewind_one_line) can do so without
    /// re-reading the file.
    pub fn next_record_with_line(&mut self) -> CoreResult<Option<(String, TraceRecord)>> {
        loop {
            let raw = match self.take_next_line()? {
                Some(line) => line,
                None => return Ok(None),
            };
            match parse_line(&raw, self.epoch_offset) {
                Ok(Some(record)) => return Ok(Some((raw, record))),
                Ok(None) => continue, // not a Requests Records line
                Err(err) => {
                    tracing::debug!(error = %err, line = %raw, "skipping corrupt trace line");
                    continue;
                }
            }
        }
    }

    /// Rewinds exactly one line: the next call to `next_record` will
    /// re-parse the line most recently returned.
    ///
    /// # Panics
    ///
    /// Panics if called twice in a row without an intervening
    /// `next_record` call, or before any line has been read — the
    /// trace reader supports at most one line of rewind by design.
    pub fn rewind_one_line(&mut self, line: String) {
        assert!(
            self.pending_rewind.is_none(),
            "rewind_one_line called twice without an intervening read"
        );
        self.pending_rewind = Some(line);
    }

    fn take_next_line(&mut self) -> CoreResult<Option<String>> {
        if let Some(line) = self.pending_rewind.take() {
            return Ok(Some(line));
        }
        let mut buf = String::new();
        let n = self.lines.read_line(&mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        while buf.ends_with('\n') || buf.ends_with('\r') {
            buf.pop();
        }
        Ok(Some(buf))
    }
}

/// Parses one trace line. Returns `Ok(None)` for lines that are valid
/// but not a `[Requests Records]` entry (the core only consumes that
/// line type); returns `Err` for a line that looks like a Requests
/// Records line but is malformed.
fn parse_line(line: &str, epoch_offset: i64) -> CoreResult<Option<TraceRecord>> {
    let marker = "[Requests Records]:";
    let Some(marker_pos) = line.find(marker) else {
        return Ok(None);
    };

    let timestamp = parse_timestamp(line)
        .ok_or_else(|| CoreError::TraceCorrupt(format!("no timestamp found: {line}")))?;

    let body = line[marker_pos + marker.len()..].trim();
    let (user_id, latency, objects) = parse_body(body)
        .ok_or_else(|| CoreError::TraceCorrupt(format!("malformed records body: {body}")))?;

    Ok(Some(TraceRecord {
        arrival_time: timestamp + epoch_offset,
        user_id,
        latency_uplink: latency.0,
        latency_downlink: latency.1,
        objects,
    }))
}

fn parse_timestamp(line: &str) -> Option<i64> {
    // Trace lines embed a "YYYY-MM-DD HH:MM:SS" timestamp as one of
    // their comma-separated prefix fields.
    for field in line.split(',') {
        let field = field.trim();
        if let Ok(dt) = NaiveDateTime::parse_from_str(field, "%Y-%m-%d %H:%M:%S") {
            return Some(dt.and_utc().timestamp());
        }
    }
    None
}

/// Parses `user_id,[latup,latdn],[[id,size],...]` into its three
/// parts. This is a small hand-rolled parser for the trace's
/// Python-list-literal grammar rather than a general expression
/// evaluator — the grammar is fixed and shallow.
fn parse_body(body: &str) -> Option<(String, (i64, i64), Vec<(String, u64)>)> {
    let first_bracket = body.find('[')?;
    let user_id = body[..first_bracket].trim().trim_end_matches(',').to_string();
    if user_id.is_empty() {
        return None;
    }

    let rest = &body[first_bracket..];
    let (latency_str, after_latency) = take_bracketed(rest)?;
    let latency_parts: Vec<i64> = latency_str
        .trim_matches(|c| c == '[' || c == ']')
        .split(',')
        .map(|s| s.trim().parse::<i64>())
        .collect::<Result<_, _>>()
        .ok()?;
    if latency_parts.len() != 2 {
        return None;
    }
    let latency = (latency_parts[0], latency_parts[1]);

    let objects_start = after_latency.find('[')?;
    let (objects_str, _) = take_bracketed(&after_latency[objects_start..])?;
    let objects = parse_object_list(&objects_str)?;

    Some((user_id, latency, objects))
}

/// Returns the contents of the first top-level `[...]` group in `s`
/// (inclusive of the brackets) and the remainder of the string after
/// it.
fn take_bracketed(s: &str) -> Option<(String, &str)> {
    let bytes = s.as_bytes();
    if bytes.first() != Some(&b'[') {
        return None;
    }
    let mut depth = 0i32;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some((s[..=i].to_string(), &s[i + 1..]));
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_object_list(s: &str) -> Option<Vec<(String, u64)>> {
    let inner = s.trim();
    let inner = inner.strip_prefix('[')?.strip_suffix(']')?.trim();
    if inner.is_empty() {
        return Some(Vec::new());
    }
    let mut objects = Vec::new();
    let mut rest = inner;
    loop {
        rest = rest.trim_start().trim_start_matches(',').trim_start();
        if rest.is_empty() {
            break;
        }
        let (pair_str, remainder) = take_bracketed(rest)?;
        let pair_inner = pair_str.trim_matches(|c| c == '[' || c == ']');
        let mut parts = pair_inner.splitn(2, ',');
        let id = parts.next()?.trim().trim_matches('"').trim_matches('\'').to_string();
        let size: u64 = parts.next()?.trim().parse().ok()?;
        objects.push((id, size));
        rest = remainder;
    }
    Some(objects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_a_well_formed_records_line() {
        let line = "Log_Sat_0, 2024-01-01 00:00:15, [Requests Records]: user-1,[10,20],[[obj-a,100], [obj-b,200]]";
        let record = parse_line(line, 0).unwrap().unwrap();
        assert_eq!(record.user_id, "user-1");
        assert_eq!(record.latency_uplink, 10);
        assert_eq!(record.latency_downlink, 20);
        assert_eq!(
            record.objects,
            vec![("obj-a".to_string(), 100), ("obj-b".to_string(), 200)]
        );
    }

    #[test]
    fn applies_epoch_offset() {
        let line = "x, 2024-01-01 00:00:15, [Requests Records]: u,[0,0],[[a,1]]";
        let record = parse_line(line, 1000).unwrap().unwrap();
        let base = parse_line(line, 0).unwrap().unwrap();
        assert_eq!(record.arrival_time, base.arrival_time + 1000);
    }

    #[test]
    fn non_records_lines_are_ignored_not_errors() {
        let line = "x, 2024-01-01 00:00:15, [Data]: some other line";
        assert_eq!(parse_line(line, 0).unwrap(), None);
    }

    #[test]
    fn malformed_records_line_is_an_error() {
        let line = "x, 2024-01-01 00:00:15, [Requests Records]: u,[notnumbers],[[a,1]]";
        assert!(parse_line(line, 0).is_err());
    }

    #[test]
    fn reader_skips_corrupt_lines_and_returns_the_next_good_one() {
        let data = "x, 2024-01-01 00:00:15, [Requests Records]: u,[bad],[[a,1]]\n\
                     x, 2024-01-01 00:00:30, [Requests Records]: u,[1,2],[[b,5]]\n";
        let mut reader = TraceReader::new(Cursor::new(data), 0);
        let record = reader.next_record().unwrap().unwrap();
        assert_eq!(record.objects, vec![("b".to_string(), 5)]);
        assert_eq!(reader.next_record().unwrap(), None);
    }

    #[test]
    fn rewind_replays_the_given_line_once() {
        let data = "x, 2024-01-01 00:00:15, [Requests Records]: u,[0,0],[[a,1]]\n\
                     x, 2024-01-01 00:00:30, [Requests Records]: u,[0,0],[[b,2]]\n";
        let mut reader = TraceReader::new(Cursor::new(data), 0);
        let first = reader.next_record().unwrap().unwrap();
        let second_line =
            "x, 2024-01-01 00:00:30, [Requests Records]: u,[0,0],[[b,2]]".to_string();
        reader.rewind_one_line(second_line);
        let replayed = reader.next_record().unwrap().unwrap();
        assert_eq!(replayed.objects, vec![("b".to_string(), 2)]);
        assert_eq!(first.objects, vec![("a".to_string(), 1)]);
    }
}
