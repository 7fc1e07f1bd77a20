//! ISO-8601 duration rendering for `InitialTerminationTime` and `TerminationTime`.

use std::time::Duration;

const SECONDS_PER_DAY: u64 = 86_400;

/// Render a duration the way cameras expect it, e.g. `PT1H`, `P1DT2H3M4S` or `P0D`.
pub fn to_iso8601(value: Duration) -> String {
    let total = value.as_secs();
    let days = total / SECONDS_PER_DAY;
    let rest = total % SECONDS_PER_DAY;
    let millis = value.subsec_millis();

    let mut out = String::from("P");
    if days > 0 {
        out.push_str(&format!("{days}D"));
    }

    if rest > 0 || millis > 0 {
        out.push('T');
        let hours = rest / 3600;
        let minutes = (rest % 3600) / 60;
        let seconds = rest % 60;
        if hours > 0 {
            out.push_str(&format!("{hours}H"));
        }
        if minutes > 0 {
            out.push_str(&format!("{minutes}M"));
        }
        if millis > 0 {
            out.push_str(&format!("{seconds}.{millis:03}S"));
        } else if seconds > 0 {
            out.push_str(&format!("{seconds}S"));
        }
    }

    if out == "P" {
        out.push_str("0D");
    }
    out
}
