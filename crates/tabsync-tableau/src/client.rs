//! Tableau Server REST client implementation.
//!
//! One signed-in session per run. The active site is part of the session
//! state and must be switched before any site-scoped call; switching is
//! never concurrent (the whole run is sequential).

use reqwest::{header, Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::TableauConfig;
use crate::error::{TableauError, TableauResult};
use crate::model::{
    Datasource, DefaultPermissionKind, Grantee, GranteeCapabilities, Group, GroupMember,
    Pagination, PermissionGrant, Project, Site, SiteRole, User, UserUpdate, Workbook,
};

const AUTH_HEADER: &str = "X-Tableau-Auth";

#[derive(Debug, Clone)]
struct Session {
    token: String,
    site_id: Uuid,
    site_content_url: String,
}

/// Client for the Tableau Server REST API.
pub struct TableauClient {
    config: TableauConfig,
    http: Client,
    session: RwLock<Option<Session>>,
}

impl TableauClient {
    /// Build a client. No network traffic until [`TableauClient::sign_in`].
    pub fn new(config: TableauConfig) -> TableauResult<Self> {
        config.validate()?;

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(!config.verify_tls)
            .default_headers(headers)
            .user_agent(concat!("tabsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TableauError::InvalidConfig(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            http,
            session: RwLock::new(None),
        })
    }

    /// The configured server URL (used in operator-facing messages).
    #[must_use]
    pub fn server_url(&self) -> &str {
        &self.config.server_url
    }

    // --- Session ---

    /// Sign in to the given site (`""` is the default site).
    pub async fn sign_in(&self, site_content_url: &str) -> TableauResult<()> {
        let body = json!({
            "credentials": {
                "name": self.config.username,
                "password": self.config.password,
                "site": { "contentUrl": site_content_url },
            }
        });
        let env: CredentialsEnvelope = self
            .request(Method::POST, "auth/signin", &[], Some(body), false)
            .await?;
        info!(server = %self.config.server_url, site = %site_content_url, "Signed in to Tableau Server");
        *self.session.write().await = Some(Session {
            token: env.credentials.token,
            site_id: env.credentials.site.id,
            site_content_url: env.credentials.site.content_url,
        });
        Ok(())
    }

    /// Switch the active site. A no-op when the session is already on the
    /// requested site (the server rejects same-site switches).
    pub async fn switch_site(&self, site_content_url: &str) -> TableauResult<()> {
        {
            let session = self.session.read().await;
            match session.as_ref() {
                Some(s) if s.site_content_url == site_content_url => return Ok(()),
                Some(_) => {}
                None => return Err(TableauError::NotSignedIn),
            }
        }
        let body = json!({ "site": { "contentUrl": site_content_url } });
        let env: CredentialsEnvelope = self
            .request(Method::POST, "auth/switchSite", &[], Some(body), true)
            .await?;
        debug!(site = %site_content_url, "Switched active site");
        *self.session.write().await = Some(Session {
            token: env.credentials.token,
            site_id: env.credentials.site.id,
            site_content_url: env.credentials.site.content_url,
        });
        Ok(())
    }

    /// End the session.
    pub async fn sign_out(&self) -> TableauResult<()> {
        if self.session.read().await.is_none() {
            return Ok(());
        }
        let _: serde_json::Value = self
            .request(Method::POST, "auth/signout", &[], None, true)
            .await
            .unwrap_or_default();
        *self.session.write().await = None;
        Ok(())
    }

    // --- Listings ---

    /// All sites on the server (paged).
    pub async fn list_sites(&self) -> TableauResult<Vec<Site>> {
        self.list_paged("sites".to_string(), Vec::new(), |env: SitesEnvelope| {
            (env.pagination, env.sites.map(|s| s.site).unwrap_or_default())
        })
        .await
    }

    /// All users on the active site (paged).
    pub async fn list_users(&self) -> TableauResult<Vec<User>> {
        let path = format!("sites/{}/users", self.site_id().await?);
        self.list_paged(path, Vec::new(), |env: UsersEnvelope| {
            (env.pagination, env.users.map(|u| u.user).unwrap_or_default())
        })
        .await
    }

    /// One user's detail record.
    pub async fn get_user(&self, id: Uuid) -> TableauResult<User> {
        let path = format!("sites/{}/users/{}", self.site_id().await?, id);
        let env: UserEnvelope = self.request(Method::GET, &path, &[], None, true).await?;
        Ok(env.user)
    }

    /// All groups on the active site (paged).
    pub async fn list_groups(&self) -> TableauResult<Vec<Group>> {
        let path = format!("sites/{}/groups", self.site_id().await?);
        self.list_paged(path, Vec::new(), |env: GroupsEnvelope| {
            (env.pagination, env.groups.map(|g| g.group).unwrap_or_default())
        })
        .await
    }

    /// Members of one group (paged).
    pub async fn list_group_members(&self, group_id: Uuid) -> TableauResult<Vec<GroupMember>> {
        let path = format!("sites/{}/groups/{}/users", self.site_id().await?, group_id);
        self.list_paged(path, Vec::new(), |env: MembersEnvelope| {
            (env.pagination, env.users.map(|u| u.user).unwrap_or_default())
        })
        .await
    }

    /// All projects on the active site (paged).
    pub async fn list_projects(&self) -> TableauResult<Vec<Project>> {
        let path = format!("sites/{}/projects", self.site_id().await?);
        self.list_paged(path, Vec::new(), |env: ProjectsEnvelope| {
            (
                env.pagination,
                env.projects.map(|p| p.project).unwrap_or_default(),
            )
        })
        .await
    }

    /// Projects owned by the given email.
    pub async fn list_projects_by_owner_email(&self, email: &str) -> TableauResult<Vec<Project>> {
        let path = format!("sites/{}/projects", self.site_id().await?);
        let filter = vec![("filter".to_string(), format!("ownerEmail:eq:{email}"))];
        self.list_paged(path, filter, |env: ProjectsEnvelope| {
            (
                env.pagination,
                env.projects.map(|p| p.project).unwrap_or_default(),
            )
        })
        .await
    }

    /// All workbooks on the active site (paged).
    pub async fn list_workbooks(&self) -> TableauResult<Vec<Workbook>> {
        let path = format!("sites/{}/workbooks", self.site_id().await?);
        self.list_paged(path, Vec::new(), |env: WorkbooksEnvelope| {
            (
                env.pagination,
                env.workbooks.map(|w| w.workbook).unwrap_or_default(),
            )
        })
        .await
    }

    /// Workbooks owned by the given email.
    pub async fn list_workbooks_by_owner_email(&self, email: &str) -> TableauResult<Vec<Workbook>> {
        let path = format!("sites/{}/workbooks", self.site_id().await?);
        let filter = vec![("filter".to_string(), format!("ownerEmail:eq:{email}"))];
        self.list_paged(path, filter, |env: WorkbooksEnvelope| {
            (
                env.pagination,
                env.workbooks.map(|w| w.workbook).unwrap_or_default(),
            )
        })
        .await
    }

    /// Workbooks visible to a user; callers filter by `owner.id` to get
    /// the owned subset.
    pub async fn list_user_workbooks(&self, user_id: Uuid) -> TableauResult<Vec<Workbook>> {
        let path = format!("sites/{}/users/{}/workbooks", self.site_id().await?, user_id);
        self.list_paged(path, Vec::new(), |env: WorkbooksEnvelope| {
            (
                env.pagination,
                env.workbooks.map(|w| w.workbook).unwrap_or_default(),
            )
        })
        .await
    }

    /// All published data sources on the active site (paged).
    pub async fn list_datasources(&self) -> TableauResult<Vec<Datasource>> {
        let path = format!("sites/{}/datasources", self.site_id().await?);
        self.list_paged(path, Vec::new(), |env: DatasourcesEnvelope| {
            (
                env.pagination,
                env.datasources.map(|d| d.datasource).unwrap_or_default(),
            )
        })
        .await
    }

    // --- User mutations ---

    /// Create a user on the active site.
    pub async fn add_user(&self, name: &str, site_role: SiteRole) -> TableauResult<User> {
        let path = format!("sites/{}/users", self.site_id().await?);
        let body = json!({ "user": { "name": name, "siteRole": site_role } });
        let env: UserEnvelope = self
            .request(Method::POST, &path, &[], Some(body), true)
            .await?;
        Ok(env.user)
    }

    /// Update user attributes; `None` fields are untouched.
    pub async fn update_user(&self, id: Uuid, update: &UserUpdate) -> TableauResult<()> {
        let path = format!("sites/{}/users/{}", self.site_id().await?, id);
        let body = json!({ "user": update });
        let _: serde_json::Value = self
            .request(Method::PUT, &path, &[], Some(body), true)
            .await?;
        Ok(())
    }

    /// Remove a user. Returns `false` when the user was already absent
    /// (stale listings can still report removed users).
    pub async fn remove_user(&self, id: Uuid) -> TableauResult<bool> {
        let path = format!("sites/{}/users/{}", self.site_id().await?, id);
        self.delete_tolerant(&path).await
    }

    // --- Group mutations ---

    /// Create a group on the active site.
    pub async fn create_group(&self, name: &str) -> TableauResult<Group> {
        let path = format!("sites/{}/groups", self.site_id().await?);
        let body = json!({ "group": { "name": name } });
        let env: GroupEnvelope = self
            .request(Method::POST, &path, &[], Some(body), true)
            .await?;
        Ok(env.group)
    }

    /// Delete a group. Returns `false` when already absent.
    pub async fn delete_group(&self, id: Uuid) -> TableauResult<bool> {
        let path = format!("sites/{}/groups/{}", self.site_id().await?, id);
        self.delete_tolerant(&path).await
    }

    /// Add a user to a group.
    pub async fn add_group_member(&self, group_id: Uuid, user_id: Uuid) -> TableauResult<()> {
        let path = format!("sites/{}/groups/{}/users", self.site_id().await?, group_id);
        let body = json!({ "user": { "id": user_id } });
        let _: serde_json::Value = self
            .request(Method::POST, &path, &[], Some(body), true)
            .await?;
        Ok(())
    }

    /// Remove a user from a group. Returns `false` when already absent.
    pub async fn remove_group_member(&self, group_id: Uuid, user_id: Uuid) -> TableauResult<bool> {
        let path = format!(
            "sites/{}/groups/{}/users/{}",
            self.site_id().await?,
            group_id,
            user_id
        );
        self.delete_tolerant(&path).await
    }

    // --- Permissions ---

    /// Explicit grants on a project.
    pub async fn list_project_grants(&self, project_id: Uuid) -> TableauResult<Vec<PermissionGrant>> {
        let path = format!(
            "sites/{}/projects/{}/permissions",
            self.site_id().await?,
            project_id
        );
        self.list_grants(&path).await
    }

    /// Default-permission template grants of one kind on a project.
    pub async fn list_project_default_grants(
        &self,
        project_id: Uuid,
        kind: DefaultPermissionKind,
    ) -> TableauResult<Vec<PermissionGrant>> {
        let path = format!(
            "sites/{}/projects/{}/default-permissions/{}",
            self.site_id().await?,
            project_id,
            kind.path_segment()
        );
        self.list_grants(&path).await
    }

    /// Explicit grants on a workbook.
    pub async fn list_workbook_grants(&self, workbook_id: Uuid) -> TableauResult<Vec<PermissionGrant>> {
        let path = format!(
            "sites/{}/workbooks/{}/permissions",
            self.site_id().await?,
            workbook_id
        );
        self.list_grants(&path).await
    }

    /// Explicit grants on a data source.
    pub async fn list_datasource_grants(
        &self,
        datasource_id: Uuid,
    ) -> TableauResult<Vec<PermissionGrant>> {
        let path = format!(
            "sites/{}/datasources/{}/permissions",
            self.site_id().await?,
            datasource_id
        );
        self.list_grants(&path).await
    }

    /// Delete a whole grant from a project (one call per capability).
    pub async fn delete_project_grant(
        &self,
        project_id: Uuid,
        grant: &PermissionGrant,
    ) -> TableauResult<()> {
        let base = format!(
            "sites/{}/projects/{}/permissions",
            self.site_id().await?,
            project_id
        );
        self.delete_grant(&base, grant).await
    }

    /// Delete a default-permission template grant from a project.
    pub async fn delete_project_default_grant(
        &self,
        project_id: Uuid,
        kind: DefaultPermissionKind,
        grant: &PermissionGrant,
    ) -> TableauResult<()> {
        let base = format!(
            "sites/{}/projects/{}/default-permissions/{}",
            self.site_id().await?,
            project_id,
            kind.path_segment()
        );
        self.delete_grant(&base, grant).await
    }

    /// Delete a whole grant from a workbook.
    pub async fn delete_workbook_grant(
        &self,
        workbook_id: Uuid,
        grant: &PermissionGrant,
    ) -> TableauResult<()> {
        let base = format!(
            "sites/{}/workbooks/{}/permissions",
            self.site_id().await?,
            workbook_id
        );
        self.delete_grant(&base, grant).await
    }

    /// Delete a whole grant from a data source.
    pub async fn delete_datasource_grant(
        &self,
        datasource_id: Uuid,
        grant: &PermissionGrant,
    ) -> TableauResult<()> {
        let base = format!(
            "sites/{}/datasources/{}/permissions",
            self.site_id().await?,
            datasource_id
        );
        self.delete_grant(&base, grant).await
    }

    // --- Internals ---

    async fn site_id(&self) -> TableauResult<Uuid> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.site_id)
            .ok_or(TableauError::NotSignedIn)
    }

    async fn auth_token(&self) -> TableauResult<String> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.token.clone())
            .ok_or(TableauError::NotSignedIn)
    }

    async fn list_grants(&self, path: &str) -> TableauResult<Vec<PermissionGrant>> {
        let env: PermissionsEnvelope = self.request(Method::GET, path, &[], None, true).await?;
        Ok(env
            .permissions
            .grantee_capabilities
            .into_iter()
            .filter_map(GranteeCapabilities::into_grant)
            .collect())
    }

    /// Grant deletion is per capability on the wire; an already-absent
    /// capability is benign.
    async fn delete_grant(&self, base: &str, grant: &PermissionGrant) -> TableauResult<()> {
        for cap in &grant.capabilities {
            let path = format!(
                "{}/{}/{}/{}/{}",
                base,
                grantee_segment(&grant.grantee),
                grant.grantee.id,
                cap.name,
                cap.mode
            );
            self.delete_tolerant(&path).await?;
        }
        Ok(())
    }

    async fn delete_tolerant(&self, path: &str) -> TableauResult<bool> {
        let result: TableauResult<serde_json::Value> =
            self.request(Method::DELETE, path, &[], None, true).await;
        match result {
            Ok(_) => Ok(true),
            Err(e) if e.is_benign_absent() => {
                debug!(path = %path, "Delete target already absent, treating as success");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn list_paged<Env, T, F>(
        &self,
        path: String,
        base_query: Vec<(String, String)>,
        extract: F,
    ) -> TableauResult<Vec<T>>
    where
        Env: DeserializeOwned,
        F: Fn(Env) -> (Option<Pagination>, Vec<T>),
    {
        let mut items: Vec<T> = Vec::new();
        let mut page: u64 = 1;
        loop {
            let mut query = base_query.clone();
            query.push(("pageSize".to_string(), self.config.page_size.to_string()));
            query.push(("pageNumber".to_string(), page.to_string()));
            let env: Env = self.request(Method::GET, &path, &query, None, true).await?;
            let (pagination, mut batch) = extract(env);
            let batch_len = batch.len();
            items.append(&mut batch);
            match pagination {
                Some(p) if batch_len > 0 && (items.len() as u64) < p.total_available => page += 1,
                _ => break,
            }
        }
        Ok(items)
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<serde_json::Value>,
        authed: bool,
    ) -> TableauResult<T> {
        let url = format!(
            "{}/api/{}/{}",
            self.config.server_url.trim_end_matches('/'),
            self.config.api_version,
            path
        );
        let mut req = self.http.request(method, &url);
        if !query.is_empty() {
            req = req.query(query);
        }
        if authed {
            req = req.header(AUTH_HEADER, self.auth_token().await?);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if status.is_success() {
            if status == StatusCode::NO_CONTENT {
                // DELETE and some PUTs return an empty body.
                return serde_json::from_value(serde_json::Value::Null).map_err(|e| {
                    TableauError::UnexpectedResponse(format!("empty body for {path}: {e}"))
                });
            }
            let text = resp.text().await?;
            if text.is_empty() {
                return serde_json::from_value(serde_json::Value::Null).map_err(|e| {
                    TableauError::UnexpectedResponse(format!("empty body for {path}: {e}"))
                });
            }
            return serde_json::from_str(&text).map_err(|e| {
                TableauError::UnexpectedResponse(format!("malformed body for {path}: {e}"))
            });
        }

        let text = resp.text().await.unwrap_or_default();
        let fault: Result<ErrorEnvelope, _> = serde_json::from_str(&text);
        match fault {
            Ok(env) => Err(TableauError::Api {
                status: status.as_u16(),
                code: env.error.code,
                summary: env.error.summary,
                detail: env.error.detail,
            }),
            Err(_) => Err(TableauError::Api {
                status: status.as_u16(),
                code: status.as_u16().to_string(),
                summary: status.to_string(),
                detail: text,
            }),
        }
    }
}

fn grantee_segment(grantee: &Grantee) -> &'static str {
    grantee.kind.path_segment()
}

// --- Wire envelopes ---

#[derive(Debug, Deserialize)]
struct CredentialsEnvelope {
    credentials: Credentials,
}

#[derive(Debug, Deserialize)]
struct Credentials {
    token: String,
    site: CredentialsSite,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialsSite {
    id: Uuid,
    #[serde(default)]
    content_url: String,
}

#[derive(Debug, Deserialize)]
struct SitesEnvelope {
    #[serde(default)]
    pagination: Option<Pagination>,
    #[serde(default)]
    sites: Option<SiteItems>,
}

#[derive(Debug, Deserialize)]
struct SiteItems {
    #[serde(default)]
    site: Vec<Site>,
}

#[derive(Debug, Deserialize)]
struct UsersEnvelope {
    #[serde(default)]
    pagination: Option<Pagination>,
    #[serde(default)]
    users: Option<UserItems>,
}

#[derive(Debug, Deserialize)]
struct UserItems {
    #[serde(default)]
    user: Vec<User>,
}

#[derive(Debug, Deserialize)]
struct UserEnvelope {
    user: User,
}

#[derive(Debug, Deserialize)]
struct GroupsEnvelope {
    #[serde(default)]
    pagination: Option<Pagination>,
    #[serde(default)]
    groups: Option<GroupItems>,
}

#[derive(Debug, Deserialize)]
struct GroupItems {
    #[serde(default)]
    group: Vec<Group>,
}

#[derive(Debug, Deserialize)]
struct GroupEnvelope {
    group: Group,
}

#[derive(Debug, Deserialize)]
struct MembersEnvelope {
    #[serde(default)]
    pagination: Option<Pagination>,
    #[serde(default)]
    users: Option<MemberItems>,
}

#[derive(Debug, Deserialize)]
struct MemberItems {
    #[serde(default)]
    user: Vec<GroupMember>,
}

#[derive(Debug, Deserialize)]
struct ProjectsEnvelope {
    #[serde(default)]
    pagination: Option<Pagination>,
    #[serde(default)]
    projects: Option<ProjectItems>,
}

#[derive(Debug, Deserialize)]
struct ProjectItems {
    #[serde(default)]
    project: Vec<Project>,
}

#[derive(Debug, Deserialize)]
struct WorkbooksEnvelope {
    #[serde(default)]
    pagination: Option<Pagination>,
    #[serde(default)]
    workbooks: Option<WorkbookItems>,
}

#[derive(Debug, Deserialize)]
struct WorkbookItems {
    #[serde(default)]
    workbook: Vec<Workbook>,
}

#[derive(Debug, Deserialize)]
struct DatasourcesEnvelope {
    #[serde(default)]
    pagination: Option<Pagination>,
    #[serde(default)]
    datasources: Option<DatasourceItems>,
}

#[derive(Debug, Deserialize)]
struct DatasourceItems {
    #[serde(default)]
    datasource: Vec<Datasource>,
}

#[derive(Debug, Deserialize)]
struct PermissionsEnvelope {
    #[serde(default)]
    permissions: PermissionsBody,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PermissionsBody {
    #[serde(default)]
    grantee_capabilities: Vec<GranteeCapabilities>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiFault,
}

#[derive(Debug, Deserialize)]
struct ApiFault {
    #[serde(default)]
    code: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    detail: String,
}
