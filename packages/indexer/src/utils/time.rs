/// Render seconds as e.g. "1m 5s"
pub fn format_duration(seconds: f64) -> String {
    let seconds = seconds as u64;

    if seconds < 60 {
        return format!("{}s", seconds);
    }

    let minutes = seconds / 60;
    let seconds = seconds % 60;

    if minutes < 60 {
        return format!("{}m {}s", minutes, seconds);
    }

    let hours = minutes / 60;
    let minutes = minutes % 60;

    if hours < 24 {
        return format!("{}h {}m {}s", hours, minutes, seconds);
    }

    let days = hours / 24;
    let hours = hours % 24;

    format!("{}d {}h {}m {}s", days, hours, minutes, seconds)
}

/// Format a scan rate, switching to per-minute or per-hour when slow
pub fn format_rate(blocks_per_second: f64) -> String {
    if blocks_per_second < 0.01 {
        format!("{:.2} blocks/hour", blocks_per_second * 3600.0)
    } else if blocks_per_second < 1.0 {
        format!("{:.2} blocks/min", blocks_per_second * 60.0)
    } else {
        format!("{:.2} blocks/sec", blocks_per_second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_pick_the_largest_units() {
        assert_eq!(format_duration(0.4), "0s");
        assert_eq!(format_duration(65.0), "1m 5s");
        assert_eq!(format_duration(3_725.0), "1h 2m 5s");
        assert_eq!(format_duration(90_061.0), "1d 1h 1m 1s");
    }

    #[test]
    fn rates_scale_down_for_slow_scans() {
        assert_eq!(format_rate(12_500.0), "12500.00 blocks/sec");
        assert_eq!(format_rate(0.5), "30.00 blocks/min");
        assert_eq!(format_rate(0.001), "3.60 blocks/hour");
    }
}