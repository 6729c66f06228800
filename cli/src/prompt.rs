// Terminal permission prompt
//
// Stands in for the platform permission dialog when the configured platform
// has runtime permissions (an Android profile, for instance). All
// permissions are shown together and answered with a single y/N.

use async_trait::async_trait;
use colored::*;
use rollcall_core::{Permission, PermissionRequester, PermissionStatus};
use std::collections::HashMap;
use std::io::{self, BufRead, Write};

pub struct ConsolePermissions {
    assume_yes: bool,
}

impl ConsolePermissions {
    pub fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }
}

fn ask(permissions: &[Permission]) -> bool {
    println!("{}", "Permission request".bold());
    for permission in permissions {
        println!("  • {}", permission.to_string().bright_yellow());
    }
    print!("Grant all? [y/N] ");
    if io::stdout().flush().is_err() {
        return false;
    }

    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[async_trait]
impl PermissionRequester for ConsolePermissions {
    async fn request(&self, permissions: &[Permission]) -> HashMap<Permission, PermissionStatus> {
        let granted = if self.assume_yes {
            true
        } else {
            let owned = permissions.to_vec();
            tokio::task::spawn_blocking(move || ask(&owned))
                .await
                .unwrap_or(false)
        };

        let status = if granted {
            PermissionStatus::Granted
        } else {
            PermissionStatus::Denied
        };
        permissions.iter().map(|p| (*p, status)).collect()
    }
}
