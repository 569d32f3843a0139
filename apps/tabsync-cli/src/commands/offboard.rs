//! `tabsync offboard` — escalating notices for leaving users who still
//! own Tableau content.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use clap::Args;
use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use tabsync_engine::{evaluate_escalation, EscalationStep, Mailer, NotificationGate, OutboundMail};
use tabsync_tableau::{Project, TableauClient};

use crate::config::{AppConfig, OffboardConfig};
use crate::error::{CliError, CliResult};
use crate::hrms::HrmsClient;
use crate::mail::{LogOnlyMailer, SmtpRelayMailer};

#[derive(Debug, Args)]
pub struct OffboardArgs {
    /// Override the recipient list (comma-separated)
    #[arg(short = 'm', long)]
    pub mail_to: Option<String>,

    /// Print the assembled report as JSON and exit
    #[arg(short = 'p', long)]
    pub print_data: bool,

    /// Read the report from a JSON file instead of querying the HR system
    #[arg(short = 'l', long)]
    pub load_file: Option<PathBuf>,
}

/// One leaving user's assembled report: HR identity plus the Tableau
/// content they still own, per site. This is also the template context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportUser {
    pub username: String,
    pub display_name: String,
    pub email: String,
    pub manager: ManagerInfo,
    pub termination_date: DateTime<Utc>,
    #[serde(default)]
    pub tableau_url: String,
    #[serde(default)]
    pub sites: BTreeMap<String, SiteResources>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerInfo {
    pub display_name: String,
    pub email: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteResources {
    pub user_content_url: String,
    pub workbooks: Vec<WorkbookInfo>,
    pub projects: Vec<ProjectInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkbookInfo {
    pub name: String,
    pub project_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub name: String,
    pub path: String,
}

pub async fn execute(config: AppConfig, args: OffboardArgs, dry_run: bool) -> CliResult<()> {
    let offboard = config
        .offboard
        .clone()
        .ok_or_else(|| CliError::Config("offboard section missing from configuration".into()))?;

    let mut report = match &args.load_file {
        Some(path) => {
            info!(path = %path.display(), "Loading report data from file");
            let raw = std::fs::read_to_string(path)?;
            serde_json::from_str(&raw)?
        }
        None => fetch_report(&offboard).await?,
    };

    inventory_tableau_content(&config, &mut report).await?;

    if args.print_data {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let recipients: Vec<String> = match &args.mail_to {
        Some(list) => list.split(',').map(|s| s.trim().to_string()).collect(),
        None => offboard.recipients.clone(),
    };
    let mailer: Box<dyn Mailer> = match (&config.mail, dry_run) {
        (Some(mail), false) => Box::new(SmtpRelayMailer::with_recipients(
            mail.clone(),
            recipients.clone(),
        )),
        _ => Box::new(LogOnlyMailer),
    };

    let template_source = std::fs::read_to_string(&offboard.template).map_err(|e| {
        CliError::Config(format!(
            "cannot read template '{}': {e}",
            offboard.template.display()
        ))
    })?;
    let mut handlebars = Handlebars::new();
    handlebars.set_strict_mode(true);
    handlebars
        .register_template_string("offboard", template_source)
        .map_err(|e| CliError::Config(format!("invalid offboard template: {e}")))?;

    let mut gate = NotificationGate::load(&config.state_file)?;
    let server_host = config
        .tableau
        .server_url
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .to_string();
    let subject =
        format!("Moving {server_host} reports of the user leaving the company");

    for user in &report {
        let days_left = (user.termination_date - Utc::now()).num_days();
        info!(user = %user.username, days_left, "Processing leaving user");

        match evaluate_escalation(days_left, &gate.sent_milestones(&user.username)) {
            EscalationStep::Clear => {
                if dry_run {
                    info!(user = %user.username, "Dry run: would clear notification state");
                } else {
                    gate.clear(&user.username)?;
                }
            }
            EscalationStep::Hold => {}
            EscalationStep::Send(milestone) => {
                if user.sites.is_empty() {
                    info!(user = %user.username, "No owned Tableau content; nothing to report");
                    continue;
                }
                info!(user = %user.username, milestone = ?milestone, recipients = ?recipients, "Sending offboarding notice");
                let html = handlebars
                    .render("offboard", user)
                    .map_err(|e| CliError::Config(format!("template rendering failed: {e}")))?;
                let mail = OutboundMail {
                    subject: subject.clone(),
                    text_body: plain_summary(user),
                    html_body: Some(html),
                };
                mailer.send(&mail).await;
                if !dry_run {
                    gate.mark_sent(&user.username, milestone)?;
                }
            }
        }
    }
    Ok(())
}

/// Pull departures and user/manager details from the HR system.
async fn fetch_report(offboard: &OffboardConfig) -> CliResult<Vec<ReportUser>> {
    let mut hrms = HrmsClient::new(&offboard.hrms_url)?;
    hrms.authenticate(offboard).await?;

    let departures = hrms
        .leaving_users(
            Duration::days(offboard.lookback_days),
            Duration::days(offboard.lookahead_days),
        )
        .await?;
    info!(count = departures.len(), "Leaving users reported by HR system");

    let mut report = Vec::with_capacity(departures.len());
    for departure in departures {
        let user = hrms.user(&departure.user_id).await?;
        let manager = hrms.user(&departure.manager_id).await?;
        info!(
            user = %user.username,
            termination_date = %departure.termination_date.date_naive(),
            manager_email = %manager.email,
            "Departure"
        );
        report.push(ReportUser {
            username: user.username,
            display_name: user.display_name,
            email: user.email,
            manager: ManagerInfo {
                display_name: manager.display_name,
                email: manager.email,
            },
            termination_date: departure.termination_date,
            tableau_url: String::new(),
            sites: BTreeMap::new(),
        });
    }
    Ok(report)
}

/// Walk every site and record the workbooks and projects each leaving
/// user still owns.
async fn inventory_tableau_content(
    config: &AppConfig,
    report: &mut [ReportUser],
) -> CliResult<()> {
    let tableau = TableauClient::new(config.tableau.clone())?;
    tableau.sign_in("").await?;
    let server = config.tableau.server_url.trim_end_matches('/');

    for user in report.iter_mut() {
        user.tableau_url = server.to_string();
    }

    for site in tableau.list_sites().await? {
        tableau.switch_site(&site.content_url).await?;
        let paths = project_paths(&tableau.list_projects().await?);

        for user in report.iter_mut() {
            if user.email.is_empty() {
                warn!(user = %user.username, "No email in HR record; cannot match Tableau content");
                continue;
            }
            let workbooks = tableau.list_workbooks_by_owner_email(&user.email).await?;
            let projects = tableau.list_projects_by_owner_email(&user.email).await?;
            if workbooks.is_empty() && projects.is_empty() {
                continue;
            }

            let user_content_url = if site.content_url.is_empty() {
                format!("{server}/#/user/local/{}/content", user.username)
            } else {
                format!(
                    "{server}/#/site/{}/user/local/{}/content",
                    site.content_url, user.username
                )
            };
            user.sites.insert(
                site.name.clone(),
                SiteResources {
                    user_content_url,
                    workbooks: workbooks
                        .into_iter()
                        .map(|w| WorkbookInfo {
                            name: w.name,
                            project_name: w.project.map(|p| p.name).unwrap_or_default(),
                        })
                        .collect(),
                    projects: projects
                        .into_iter()
                        .map(|p| ProjectInfo {
                            path: paths.get(&p.id).cloned().unwrap_or_default(),
                            name: p.name,
                        })
                        .collect(),
                },
            );
        }
    }
    let _ = tableau.sign_out().await;
    Ok(())
}

/// Human-readable path for every project: `Home / parent / child`.
/// A broken parent chain (cycle or missing id) just truncates the path.
fn project_paths(projects: &[Project]) -> HashMap<Uuid, String> {
    let by_id: HashMap<Uuid, &Project> = projects.iter().map(|p| (p.id, p)).collect();
    let mut paths = HashMap::new();
    for project in projects {
        let mut segments: Vec<&str> = Vec::new();
        let mut visited: HashSet<Uuid> = HashSet::new();
        let mut cursor = project.parent_project_id;
        while let Some(id) = cursor {
            if !visited.insert(id) {
                break;
            }
            let Some(parent) = by_id.get(&id) else { break };
            segments.push(&parent.name);
            cursor = parent.parent_project_id;
        }
        segments.push("Home");
        segments.reverse();
        paths.insert(project.id, segments.join(" / "));
    }
    paths
}

fn plain_summary(user: &ReportUser) -> String {
    let mut out = format!(
        "{} is leaving on {} and still owns Tableau content:\n",
        user.display_name,
        user.termination_date.date_naive()
    );
    for (site, resources) in &user.sites {
        out.push_str(&format!(
            "  site {site}: {} workbook(s), {} project(s) — {}\n",
            resources.workbooks.len(),
            resources.projects.len(),
            resources.user_content_url
        ));
    }
    out.push_str(&format!("Manager: {} <{}>\n", user.manager.display_name, user.manager.email));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(id: u128, name: &str, parent: Option<u128>) -> Project {
        Project {
            id: Uuid::from_u128(id),
            name: name.to_string(),
            parent_project_id: parent.map(Uuid::from_u128),
        }
    }

    #[test]
    fn paths_climb_to_home() {
        let projects = vec![
            project(1, "Finance", None),
            project(2, "Reports", Some(1)),
            project(3, "Monthly", Some(2)),
        ];
        let paths = project_paths(&projects);
        assert_eq!(paths[&Uuid::from_u128(1)], "Home");
        assert_eq!(paths[&Uuid::from_u128(2)], "Home / Finance");
        assert_eq!(paths[&Uuid::from_u128(3)], "Home / Finance / Reports");
    }

    #[test]
    fn cyclic_parent_chain_terminates() {
        let projects = vec![project(1, "A", Some(2)), project(2, "B", Some(1))];
        let paths = project_paths(&projects);
        assert_eq!(paths.len(), 2);
    }

    #[test]
    fn report_user_round_trips_through_json() {
        let user = ReportUser {
            username: "jdoe".into(),
            display_name: "Jane Doe".into(),
            email: "jdoe@example.com".into(),
            manager: ManagerInfo {
                display_name: "Max Mustermann".into(),
                email: "max@example.com".into(),
            },
            termination_date: Utc::now(),
            tableau_url: "https://tableau.example.com".into(),
            sites: BTreeMap::new(),
        };
        let json = serde_json::to_string(&user).unwrap();
        let back: ReportUser = serde_json::from_str(&json).unwrap();
        assert_eq!(back.username, "jdoe");
    }
}
