use std::{
    fmt::{self, Write},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use crate::{
    error::{Error, Result},
    key::{MetricKey, Tags},
    Sample,
};

/// `seg0.seg1[;tag=value...]`
pub fn encode_key(wtr: &mut impl Write, key: &MetricKey) -> fmt::Result {
    let mut segments = key.path().iter();
    if let Some(first) = segments.next() {
        wtr.write_str(first)?;
    }
    for segment in segments {
        wtr.write_char('.')?;
        wtr.write_str(segment)?;
    }
    for (tag, value) in key.tags().iter() {
        wtr.write_char(';')?;
        wtr.write_str(tag)?;
        wtr.write_char('=')?;
        wtr.write_str(value)?;
    }
    Ok(())
}
pub fn decode_key(s: &str) -> Result<MetricKey> {
    let mut parts = s.split(';');
    let name = parts.next().unwrap_or_default();
    let mut tags = Tags::new();
    for part in parts {
        let Some((tag, value)) = part.split_once('=') else {
            return Err(Error::Parse(format!("tag without value: {part:?}")));
        };
        tags.insert(tag, value)?;
    }
    MetricKey::new(name.split('.'), tags)
}

/// One wire line without the trailing newline.
pub fn encode_sample(wtr: &mut impl Write, sample: &Sample) -> fmt::Result {
    encode_key(wtr, sample.key())?;
    write!(wtr, " {} {}", sample.value(), unix_secs(sample.time()))
}
pub fn decode_line(line: &str) -> Result<Sample> {
    let line = line.strip_suffix('\n').unwrap_or(line);
    let mut fields = line.split(' ');
    let (Some(key), Some(value), Some(time), None) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err(Error::Parse(format!(
            "expected `<name> <value> <timestamp>`, got {line:?}"
        )));
    };
    let key = decode_key(key)?;
    let secs: i64 = time
        .parse()
        .map_err(|e| Error::Parse(format!("bad timestamp {time:?}: {e}")))?;
    let time = from_unix_secs(secs)
        .ok_or_else(|| Error::Parse(format!("timestamp out of range: {secs}")))?;
    Sample::new(key, value, time)
}

/// Joins the samples' lines with `\n` and terminates the message with exactly
/// one `\n`.
pub fn encode_batch(buf: &mut String, samples: &[Sample]) {
    for (i, sample) in samples.iter().enumerate() {
        if i != 0 {
            buf.push('\n');
        }
        // Writing into a `String` cannot fail.
        let _ = encode_sample(buf, sample);
    }
    if !buf.ends_with('\n') {
        buf.push('\n');
    }
}

/// Whole seconds since the Unix epoch, rounded toward negative infinity.
pub fn unix_secs(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_secs()).unwrap_or(i64::MAX),
        Err(e) => {
            let before = e.duration();
            let secs = before.as_secs() + u64::from(before.subsec_nanos() != 0);
            i64::try_from(secs).map_or(i64::MIN, |secs| -secs)
        }
    }
}
fn from_unix_secs(secs: i64) -> Option<SystemTime> {
    let offset = Duration::from_secs(secs.unsigned_abs());
    if secs >= 0 {
        UNIX_EPOCH.checked_add(offset)
    } else {
        UNIX_EPOCH.checked_sub(offset)
    }
}
