use crate::error::{ParseError, ScheduleError};
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use std::future::Future;
use std::str::FromStr;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Produces the next matching instant strictly after a reference instant.
pub trait Expression: Send + Sync {
    fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>>;
}

/// Source of the instant a schedule starts counting from.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A cron expression evaluated in a fixed time zone.
#[derive(Debug, Clone)]
pub struct CronExpression {
    source: String,
    schedule: cron::Schedule,
    timezone: Tz,
}

impl CronExpression {
    /// Parses a cron expression. Five-field expressions are standard cron
    /// (minute first, day of week 0-7 with Sunday as 0 or 7): they get a
    /// `0` seconds field prepended and their day-of-week field rewritten as
    /// day names, since the `cron` crate numbers days 1-7 from Sunday. Six
    /// and seven field expressions (seconds first, optional year) and
    /// `@daily`-style shortcuts are used as they are.
    pub fn parse(expression: &str) -> Result<Self, ParseError> {
        let trimmed = expression.trim();
        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        let normalized = if fields.len() == 5 {
            let weekdays = weekday_names(fields[4]).ok_or_else(|| ParseError::Cron {
                expression: expression.to_string(),
                reason: format!("invalid day-of-week field {:?}", fields[4]),
            })?;
            format!("0 {} {}", fields[..4].join(" "), weekdays)
        } else {
            trimmed.to_string()
        };

        let schedule = cron::Schedule::from_str(&normalized).map_err(|e| ParseError::Cron {
            expression: expression.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            source: trimmed.to_string(),
            schedule,
            timezone: Tz::UTC,
        })
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

const WEEKDAYS: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Expands a standard day-of-week field (lists, ranges and steps over
/// `0-7` or `sun`-`sat`) into a comma separated list of day names.
fn weekday_names(field: &str) -> Option<String> {
    if field == "*" || field == "?" {
        return Some(field.to_string());
    }

    let mut days = [false; 7];
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, step.parse::<usize>().ok().filter(|s| *s > 0)?),
            None => (item, 1),
        };
        let (start, end) = match range {
            "*" | "?" => (0, 6),
            _ => match range.split_once('-') {
                Some((start, end)) => {
                    let (start, end) = (weekday(start)?, weekday(end)?);
                    // `fri-sun` wraps onto Sunday as 7.
                    (start, if end == 0 && start > 0 { 7 } else { end })
                }
                None if step > 1 => (weekday(range)?, 7),
                None => {
                    let day = weekday(range)?;
                    (day, day)
                }
            },
        };
        if start > end {
            return None;
        }
        for day in (start..=end).step_by(step) {
            days[day % 7] = true;
        }
    }

    if days.iter().all(|set| *set) {
        return Some("*".to_string());
    }
    let names: Vec<&str> = WEEKDAYS
        .iter()
        .zip(days)
        .filter_map(|(name, set)| set.then_some(*name))
        .collect();
    Some(names.join(","))
}

fn weekday(token: &str) -> Option<usize> {
    match token.parse::<usize>() {
        Ok(n) if n <= 7 => Some(n),
        Ok(_) => None,
        Err(_) => WEEKDAYS
            .iter()
            .position(|name| name.eq_ignore_ascii_case(token)),
    }
}

impl Expression for CronExpression {
    fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&after.with_timezone(&self.timezone))
            .next()
            .map(|next| next.with_timezone(&Utc))
    }
}

/// Fires at a fixed cadence from wherever the schedule starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalExpression {
    every: Duration,
}

impl IntervalExpression {
    pub fn new(every: std::time::Duration) -> Result<Self, ParseError> {
        let every = Duration::from_std(every)
            .ok()
            .filter(|d| *d > Duration::zero())
            .ok_or_else(|| ParseError::Interval(format!("{:?}", every)))?;
        Ok(Self { every })
    }

    pub fn every(&self) -> Duration {
        self.every
    }
}

impl Expression for IntervalExpression {
    fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        after.checked_add_signed(self.every)
    }
}

#[derive(Debug, Clone)]
pub enum ScheduleConfig {
    Cron(CronExpression),
    Every(IntervalExpression),
}

impl Expression for ScheduleConfig {
    fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            ScheduleConfig::Cron(cron) => cron.next_after(after),
            ScheduleConfig::Every(interval) => interval.next_after(after),
        }
    }
}

/// Parses `every <n>s|m|h` into a fixed interval and anything else as a
/// cron expression evaluated in UTC.
pub fn parse_schedule(s: &str) -> Result<ScheduleConfig, ParseError> {
    parse_schedule_in(s, Tz::UTC)
}

/// Like [`parse_schedule`], evaluating cron expressions in `timezone`.
pub fn parse_schedule_in(s: &str, timezone: Tz) -> Result<ScheduleConfig, ParseError> {
    let s = s.trim();
    if let Some(duration_str) = s.strip_prefix("every ") {
        let seconds = parse_duration(duration_str.trim())?;
        let interval = IntervalExpression::new(std::time::Duration::from_secs(seconds))?;
        Ok(ScheduleConfig::Every(interval))
    } else {
        Ok(ScheduleConfig::Cron(
            CronExpression::parse(s)?.with_timezone(timezone),
        ))
    }
}

pub fn parse_timezone(name: &str) -> Result<Tz, ParseError> {
    name.parse::<Tz>()
        .map_err(|_| ParseError::TimeZone(name.to_string()))
}

fn parse_duration(s: &str) -> Result<u64, ParseError> {
    let invalid = || ParseError::Interval(s.to_string());
    let unit = s.chars().last().ok_or_else(invalid)?;
    let n: u64 = s[..s.len() - unit.len_utf8()].parse().map_err(|_| invalid())?;
    let seconds = match unit {
        's' => Some(n),
        'm' => n.checked_mul(60),
        'h' => n.checked_mul(3600),
        _ => None,
    };
    seconds.filter(|secs| *secs > 0).ok_or_else(invalid)
}

/// The next `count` fire instants after `from`, stopping early if the
/// expression runs out.
pub fn upcoming<X: Expression + ?Sized>(
    expression: &X,
    from: DateTime<Utc>,
    count: usize,
) -> Vec<DateTime<Utc>> {
    std::iter::successors(expression.next_after(from), |prev| {
        expression.next_after(*prev)
    })
    .take(count)
    .collect()
}

/// Runs `callback` every time `expression` fires until `cancel` is
/// triggered or the callback fails. Blocks the calling task for the whole
/// run. See [`run_with_expression`].
pub async fn run_schedule<F, Fut, E>(
    expression: &str,
    cancel: &CancellationToken,
    callback: F,
) -> Result<(), ScheduleError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
{
    let expression = parse_schedule(expression)?;
    run_with_expression(&expression, &SystemClock, cancel, callback).await
}

/// Scheduling loop over an already parsed expression.
///
/// Each fire instant is computed from the previous *fire instant*, starting
/// at `clock.now()`, never from the time the callback returned. The waits
/// are laid end to end on the monotonic clock, so a slow callback delays
/// the next tick but does not shift the ones after it.
///
/// Cancellation is only observed between ticks and returns `Ok(())`.
/// Callbacks never overlap.
pub async fn run_with_expression<X, C, F, Fut, E>(
    expression: &X,
    clock: &C,
    cancel: &CancellationToken,
    mut callback: F,
) -> Result<(), ScheduleError<E>>
where
    X: Expression + ?Sized,
    C: Clock + ?Sized,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
{
    let mut previous = clock.now();
    let mut deadline = Instant::now();

    loop {
        let next = expression
            .next_after(previous)
            .ok_or(ScheduleError::Exhausted)?;
        let wait = (next - previous).to_std().unwrap_or_default();
        previous = next;
        deadline += wait;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep_until(deadline) => {}
        }

        callback().await.map_err(ScheduleError::Callback)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Weekday};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    /// Fires every `step` seconds and records every reference instant.
    struct Recorded {
        step: i64,
        anchors: Mutex<Vec<DateTime<Utc>>>,
    }

    impl Recorded {
        fn every(step: i64) -> Self {
            Self {
                step,
                anchors: Mutex::new(Vec::new()),
            }
        }
    }

    impl Expression for Recorded {
        fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
            self.anchors.lock().unwrap().push(after);
            Some(after + Duration::seconds(self.step))
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[derive(Debug, PartialEq, Eq)]
    struct Boom(usize);

    #[test]
    fn test_five_field_cron_is_normalized() {
        let expr = CronExpression::parse("30 2 * * *").unwrap();
        let next = expr.next_after(t0()).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 2, 30, 0).unwrap());
        assert_eq!(expr.as_str(), "30 2 * * *");
    }

    fn weekdays(expression: &str, count: usize) -> Vec<Weekday> {
        let expr = CronExpression::parse(expression).unwrap();
        upcoming(&expr, t0(), count).iter().map(|t| t.weekday()).collect()
    }

    #[test]
    fn test_five_field_day_of_week_is_standard() {
        // t0 is Monday 2024-01-01 00:00, so the first Monday match is a week on.
        let monday = CronExpression::parse("0 0 * * 1").unwrap();
        assert_eq!(
            monday.next_after(t0()).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap()
        );

        let sunday = Utc.with_ymd_and_hms(2024, 1, 7, 0, 0, 0).unwrap();
        for expr in ["0 0 * * 0", "0 0 * * 7", "0 0 * * sun", "0 0 * * SUN"] {
            assert_eq!(CronExpression::parse(expr).unwrap().next_after(t0()).unwrap(), sunday, "{expr}");
        }

        use Weekday::*;
        assert_eq!(weekdays("0 9 * * 1-5", 6), vec![Mon, Tue, Wed, Thu, Fri, Mon]);
        assert_eq!(weekdays("0 9 * * mon-fri", 5), vec![Mon, Tue, Wed, Thu, Fri]);
        assert_eq!(weekdays("0 9 * * 5-7", 4), vec![Fri, Sat, Sun, Fri]);
        assert_eq!(weekdays("0 9 * * fri-sun", 3), vec![Fri, Sat, Sun]);
        assert_eq!(weekdays("0 9 * * 0,3", 3), vec![Wed, Sun, Wed]);
        assert_eq!(weekdays("0 9 * * */2", 4), vec![Tue, Thu, Sat, Sun]);
        assert_eq!(weekdays("0 9 * * 1-5/2", 3), vec![Mon, Wed, Fri]);
        assert_eq!(weekdays("0 9 * * 0-7", 3), vec![Mon, Tue, Wed]);

        for bad in ["0 0 * * 8", "0 0 * * 5-1", "0 0 * * */0", "0 0 * * funday"] {
            assert!(matches!(CronExpression::parse(bad), Err(ParseError::Cron { .. })), "{bad}");
        }
    }

    #[test]
    fn test_five_field_day_of_month() {
        let expr = CronExpression::parse("0 0 15 * *").unwrap();
        assert_eq!(
            upcoming(&expr, t0(), 2),
            vec![
                Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 2, 15, 0, 0, 0).unwrap(),
            ]
        );
    }

    #[test]
    fn test_weekly_shortcut_fires_on_sunday() {
        let expr = CronExpression::parse("@weekly").unwrap();
        assert_eq!(
            expr.next_after(t0()).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 7, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_six_field_cron_keeps_seconds() {
        let expr = CronExpression::parse("*/15 * * * * *").unwrap();
        assert_eq!(
            expr.next_after(t0()).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 15).unwrap()
        );
    }

    #[test]
    fn test_invalid_cron() {
        assert!(matches!(
            CronExpression::parse("not a cron"),
            Err(ParseError::Cron { .. })
        ));
    }

    #[test]
    fn test_cron_in_timezone() {
        let tz = parse_timezone("Europe/Oslo").unwrap();
        let expr = CronExpression::parse("0 3 * * *").unwrap().with_timezone(tz);
        // 03:00 in Oslo is 02:00 UTC in winter.
        assert_eq!(
            expr.next_after(t0()).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap()
        );
        assert!(parse_timezone("Mars/Olympus").is_err());
    }

    #[test]
    fn test_parse_every() {
        let schedule = parse_schedule("every 15m").unwrap();
        assert!(matches!(schedule, ScheduleConfig::Every(i) if i.every() == Duration::minutes(15)));
        assert_eq!(
            schedule.next_after(t0()).unwrap(),
            t0() + Duration::minutes(15)
        );

        for bad in ["every 0s", "every 10d", "every m", "every 5"] {
            assert!(
                matches!(parse_schedule(bad), Err(ParseError::Interval(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_upcoming() {
        let schedule = parse_schedule("0 */6 * * *").unwrap();
        let hours: Vec<u32> = upcoming(&schedule, t0(), 4)
            .iter()
            .map(|t| chrono::Timelike::hour(t))
            .collect();
        assert_eq!(hours, vec![6, 12, 18, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_expression_never_starts() {
        let calls = AtomicUsize::new(0);
        let cancel = CancellationToken::new();
        let result = run_schedule("61 * * * *", &cancel, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<(), Boom>(()) }
        })
        .await;
        assert!(matches!(result, Err(ScheduleError::Parse(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_first_tick() {
        let calls = AtomicUsize::new(0);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = run_with_expression(&Recorded::every(60), &FixedClock(t0()), &cancel, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<(), Boom>(()) }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_waiting() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(35)).await;
            trigger.cancel();
        });

        let calls = AtomicUsize::new(0);
        let result = run_with_expression(&Recorded::every(10), &FixedClock(t0()), &cancel, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<(), Boom>(()) }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_n_ticks() {
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let result = run_with_expression(&Recorded::every(5), &FixedClock(t0()), &cancel, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n == 7 {
                cancel.cancel();
            }
            async { Ok::<(), Boom>(()) }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_error_stops_loop() {
        let cancel = CancellationToken::new();
        let calls = AtomicUsize::new(0);

        let result = run_with_expression(&Recorded::every(1), &FixedClock(t0()), &cancel, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n == 4 {
                    Err(Boom(n))
                } else {
                    Ok(())
                }
            }
        })
        .await;

        match result {
            Err(ScheduleError::Callback(e)) => assert_eq!(e, Boom(4)),
            other => panic!("expected callback error, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_drift_with_slow_callback() {
        let cancel = CancellationToken::new();
        let expression = Recorded::every(10);
        let calls = AtomicUsize::new(0);
        let started = Instant::now();

        run_with_expression(&expression, &FixedClock(t0()), &cancel, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n == 100 {
                cancel.cancel();
            }
            async {
                tokio::time::sleep(std::time::Duration::from_secs(3)).await;
                Ok::<(), Boom>(())
            }
        })
        .await
        .unwrap();

        // One anchor per tick, plus the one computed before cancellation
        // was observed.
        let anchors = expression.anchors.lock().unwrap();
        assert_eq!(anchors.len(), 101);
        for (i, anchor) in anchors.iter().enumerate() {
            assert_eq!(*anchor, t0() + Duration::seconds(10 * i as i64));
        }

        // 100 ticks of 10s plus the last callback's 3s, not 100 * 13s.
        let elapsed = started.elapsed();
        assert!(elapsed >= std::time::Duration::from_secs(1003));
        assert!(elapsed < std::time::Duration::from_secs(1010), "drifted: {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_expression() {
        struct Once;
        impl Expression for Once {
            fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
                (after == t0()).then(|| after + Duration::seconds(1))
            }
        }

        let calls = AtomicUsize::new(0);
        let result = run_with_expression(&Once, &FixedClock(t0()), &CancellationToken::new(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<(), Boom>(()) }
        })
        .await;

        assert!(matches!(result, Err(ScheduleError::Exhausted)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
