//! # Countdown announcement cadence.
//!
//! Clients hear about an impending copyover at a fixed rhythm: one message
//! when it is scheduled, one at every whole minute above one minute, then
//! at 60, 30, 15, and every second from ten down to one, and one final
//! pre-exec notice. The cadence is computed as a pure list of
//! seconds-remaining marks so it can be tested without sleeping.

use tokio_util::sync::CancellationToken;

/// Seconds-remaining values (descending) at which a countdown message is
/// sent, for a countdown of `total` seconds. The initial announcement and
/// the final pre-exec notice are separate messages and not included.
pub(crate) fn announcement_marks(total: u64) -> Vec<u64> {
    let mut marks: Vec<u64> = Vec::new();

    // Whole minutes above one minute.
    let mut minute_mark = (total / 60) * 60;
    while minute_mark > 60 {
        if minute_mark < total {
            marks.push(minute_mark);
        }
        minute_mark -= 60;
    }

    for fixed in [60, 30, 15, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1] {
        if fixed < total || (fixed == total && total <= 60) {
            marks.push(fixed);
        }
    }

    marks.retain(|&m| m <= total);
    marks.sort_unstable_by(|a, b| b.cmp(a));
    marks.dedup();
    marks
}

/// Sleeps until each mark, invoking `announce(seconds_remaining)` at every
/// one. Returns `false` when cancelled mid-countdown.
pub(crate) async fn run_marks<F>(
    total: u64,
    token: &CancellationToken,
    mut announce: F,
) -> bool
where
    F: FnMut(u64),
{
    let mut remaining = total;
    for mark in announcement_marks(total) {
        let wait = remaining - mark;
        if wait > 0 {
            let sleep = tokio::time::sleep(std::time::Duration::from_secs(wait));
            tokio::select! {
                _ = sleep => {}
                _ = token.cancelled() => return false,
            }
        }
        remaining = mark;
        announce(mark);
    }

    // Drain the final stretch down to zero.
    if remaining > 0 {
        let sleep = tokio::time::sleep(std::time::Duration::from_secs(remaining));
        tokio::select! {
            _ = sleep => {}
            _ = token.cancelled() => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_countdown_hits_every_second_from_ten() {
        assert_eq!(
            announcement_marks(10),
            vec![10, 9, 8, 7, 6, 5, 4, 3, 2, 1]
        );
    }

    #[test]
    fn one_minute_countdown() {
        assert_eq!(
            announcement_marks(60),
            vec![60, 30, 15, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1]
        );
    }

    #[test]
    fn five_minute_countdown_announces_whole_minutes() {
        let marks = announcement_marks(300);
        assert_eq!(
            marks,
            vec![240, 180, 120, 60, 30, 15, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1]
        );
    }

    #[test]
    fn odd_total_keeps_marks_below_it() {
        let marks = announcement_marks(75);
        assert_eq!(marks[0], 60);
        assert!(marks.iter().all(|&m| m < 75));
    }

    #[test]
    fn zero_and_one_second() {
        assert!(announcement_marks(0).is_empty());
        assert_eq!(announcement_marks(1), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn marks_fire_in_order_under_virtual_time() {
        let token = CancellationToken::new();
        let mut seen = Vec::new();
        let done = run_marks(10, &token, |mark| seen.push(mark)).await;
        assert!(done);
        assert_eq!(seen, vec![10, 9, 8, 7, 6, 5, 4, 3, 2, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_countdown() {
        let token = CancellationToken::new();
        let inner = token.clone();
        let handle = tokio::spawn(async move {
            run_marks(120, &inner, |_| {}).await
        });
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        token.cancel();
        assert!(!handle.await.unwrap());
    }
}
