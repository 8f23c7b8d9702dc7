//! Circulation policy knobs and server options.

use chrono::Duration;
use clap::Parser;

/// Lending policy applied by the borrow workflow.
#[derive(Debug, Clone)]
pub struct CirculationConfig {
    /// How long a borrowed copy is out before it is due back.
    pub loan_period: Duration,
    /// Maximum concurrent active borrows per user.
    pub max_active_borrows: usize,
}

impl Default for CirculationConfig {
    fn default() -> Self {
        Self {
            loan_period: Duration::days(14),
            max_active_borrows: 3,
        }
    }
}

/// Command-line / environment options for the server binary.
#[derive(Debug, Parser)]
#[command(name = "circulation", about = "Library circulation server")]
pub struct ServerOptions {
    /// Address to bind the HTTP server to.
    #[arg(long, env = "CIRCULATION_BIND", default_value = "127.0.0.1:3000")]
    pub bind: String,

    /// Loan period in days.
    #[arg(long, env = "CIRCULATION_LOAN_DAYS", default_value_t = 14)]
    pub loan_days: i64,

    /// Maximum concurrent active borrows per user.
    #[arg(long, env = "CIRCULATION_MAX_BORROWS", default_value_t = 3)]
    pub max_active_borrows: usize,

    /// Bearer token granting the admin role (demo deployments only).
    #[arg(long, env = "CIRCULATION_ADMIN_TOKEN", default_value = "admin-dev-token")]
    pub admin_token: String,

    /// Bearer token granting a student principal (demo deployments only).
    #[arg(long, env = "CIRCULATION_STUDENT_TOKEN", default_value = "student-dev-token")]
    pub student_token: String,
}

impl ServerOptions {
    pub fn circulation_config(&self) -> CirculationConfig {
        CirculationConfig {
            loan_period: Duration::days(self.loan_days),
            max_active_borrows: self.max_active_borrows,
        }
    }
}
