//! Hardware-acceleration argument injection.
//!
//! When the worker is configured with an acceleration method (see
//! <https://trac.ffmpeg.org/wiki/HWAccelIntro>), every job's argument list
//! is rewritten so the transcoder decodes with that method.

/// Transcoder flag selecting the hardware decoder.
pub const HWACCEL_FLAG: &str = "-hwaccel";

/// Interpret the raw `FFMPEG_HWACCEL` setting.
///
/// Unset, blank, or `false` disable injection.
pub fn parse_accel_setting(raw: Option<&str>) -> Option<String> {
    let value = raw?.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("false") {
        return None;
    }
    Some(value.to_string())
}

/// Rewrite `args` so the transcoder uses `accel`.
///
/// If the flag appears after the first position, the value following it is
/// replaced (or appended when the flag is the last argument). Otherwise
/// `[flag, accel]` is prepended, so a flag at index 0 ends up duplicated.
pub fn inject_accel(args: &[String], accel: &str) -> Vec<String> {
    match args.iter().position(|a| a == HWACCEL_FLAG) {
        Some(i) if i > 0 => {
            let mut out = args.to_vec();
            if i + 1 < out.len() {
                out[i + 1] = accel.to_string();
            } else {
                out.push(accel.to_string());
            }
            out
        }
        _ => {
            let mut out = Vec::with_capacity(args.len() + 2);
            out.push(HWACCEL_FLAG.to_string());
            out.push(accel.to_string());
            out.extend_from_slice(args);
            out
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
