/*
This file is part of the Drone Search Segmenter
Copyright (C) 2025 Drone Search Segmenter contributors

The Drone Search Segmenter is free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation, either version 3 of the License, or
(at your option) any later version.

This program is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with this program.  If not, see <http://www.gnu.org/licenses/>.
*/
use std::time::{Duration, Instant};

pub fn format_duration(d: Duration) -> String {
    let mut secs = d.as_secs();
    let hours = secs / 3600;
    secs = secs % 3600;
    let minutes = secs / 60;
    secs = secs % 60;

    let ms = d.as_millis() % 1000;

    format!("{}h {}m {}s {}ms", hours, minutes, secs, ms)
}

pub fn log_remaining_time(start: &Instant, num_processed: u32, num_total: u32, msg: &str) {
    let elapsed = start.elapsed();
    let time_per_result = if num_processed == 0 {
        elapsed / 1
    } else {
        elapsed / num_processed
    };
    let est_remaining = time_per_result * num_total.saturating_sub(num_processed);
    log::info!(
        "{}: through {} of {}. Elapsed: {}. Est. remaining: {}",
        msg,
        num_processed,
        num_total,
        format_duration(elapsed),
        format_duration(est_remaining)
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(1500)), "0h 0m 1s 500ms");
        assert_eq!(
            format_duration(Duration::from_secs(3600 + 61)),
            "1h 1m 1s 0ms"
        );
    }
}
