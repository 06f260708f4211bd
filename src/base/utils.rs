use std::time::Duration;

fn read_float_and_factor_from_env(var: &str) -> Option<(f64, usize)> {
    let value = std::env::var(var).ok()?;
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    let value = if value.len() > 1 && (value.ends_with('b') || value.ends_with('B')) {
        &value[..value.len() - 1]
    } else {
        value
    };

    let (digits, factor) = match value.as_bytes()[value.len() - 1] {
        b'g' | b'G' => (&value[..value.len() - 1], 1024 * 1024 * 1024),
        b'm' | b'M' => (&value[..value.len() - 1], 1024 * 1024),
        b'k' | b'K' => (&value[..value.len() - 1], 1024),
        _ => (value, 1),
    };

    digits.parse::<f64>().ok().map(|x| (x, factor))
}

pub fn read_uint_from_env(var: &str) -> Option<usize> {
    let (value, factor) = read_float_and_factor_from_env(var)?;
    // `as` saturates; out-of-range values are rejected instead.
    if !value.is_finite() || value < 0.0 || value >= usize::MAX as f64 {
        return None;
    }

    (value as usize).checked_mul(factor)
}

pub fn read_float_from_env(var: &str) -> Option<f64> {
    read_float_and_factor_from_env(var).map(|x| x.0)
}

pub fn read_string_from_env(var: &str) -> Option<String> {
    std::env::var(var).ok()
}

/// Accepts `1`/`0`, `true`/`false`, `yes`/`no` and `on`/`off` in any case.
pub fn read_bool_from_env(var: &str) -> Option<bool> {
    let value = read_string_from_env(var)?;

    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Milliseconds, fractional values allowed (`0.5` is 500us).
pub fn read_millis_from_env(var: &str) -> Option<Duration> {
    let value = read_float_from_env(var)?;
    if value < 0.0 || !value.is_finite() {
        return None;
    }

    Some(Duration::from_nanos((value * 1_000_000.0).round() as u64))
}

pub fn formatted_duration(duration: Duration) -> String {
    let micros = duration.as_micros();
    if micros < 1000 {
        format!("{}us", micros)
    } else if micros < 1_000_000 {
        format!("{:.3}ms", micros as f64 / 1000.0)
    } else {
        format!("{:.3}s", duration.as_secs_f64())
    }
}
