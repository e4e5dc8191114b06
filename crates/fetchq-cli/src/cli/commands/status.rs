//! `fetchq status` – show all jobs.

use fetchq_core::job::{unix_timestamp, JobStatus};
use fetchq_core::scheduler::JobView;

pub fn print_table(jobs: &[JobView]) {
    if jobs.is_empty() {
        println!("Queue is empty.");
        return;
    }
    let now = unix_timestamp();
    println!("{:<6} {:<12} {:>7}  {:<24} {}", "ID", "STATUS", "PROG", "DETAIL", "TITLE");
    for job in jobs {
        let r = &job.record;
        let status = if job.paused {
            format!("{} (p)", r.status())
        } else {
            r.status().to_string()
        };
        println!(
            "{:<6} {:<12} {:>6.1}%  {:<24} {}",
            r.id,
            status,
            r.progress(),
            detail(job, now),
            r.title
        );
        if let Some(error) = r.error() {
            println!("{:<6} {}", "", error);
        }
    }
}

fn detail(job: &JobView, now: i64) -> String {
    let r = &job.record;
    match r.status() {
        JobStatus::Scheduled => r
            .scheduled_at()
            .map(|at| format_when(at, now))
            .unwrap_or_default(),
        JobStatus::Downloading => {
            let rate = job
                .transfer_rate
                .map(|b| format!("{:.2} MiB/s", b / 1_048_576.0))
                .unwrap_or_else(|| "-".to_string());
            let eta = job
                .eta_secs
                .map(|s| format!("ETA {:.0}s", s))
                .unwrap_or_default();
            format!("{} {}", rate, eta).trim().to_string()
        }
        JobStatus::Complete => r
            .artifact()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        _ => String::new(),
    }
}

/// `at` as unix seconds plus a rough relative hint.
pub fn format_when(at: i64, now: i64) -> String {
    let delta = at - now;
    if delta <= 0 {
        return format!("at {} (due)", at);
    }
    let hint = match delta {
        d if d < 60 => format!("{}s", d),
        d if d < 3600 => format!("{}m {}s", d / 60, d % 60),
        d if d < 86_400 => format!("{}h {}m", d / 3600, (d % 3600) / 60),
        d => format!("{}d {}h", d / 86_400, (d % 86_400) / 3600),
    };
    format!("at {} (in {})", at, hint)
}
