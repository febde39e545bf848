//! Administrative `create` subcommands. Each validates its references
//! against the existing manifests under a bounded deadline, then persists a
//! single new manifest.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Subcommand};
use identity::repository::{LabelSelector, Repository, ResourceStore};
use identity::resources::{
    Group, Metadata, NAME_LABEL, OAuth2Client, OAuth2Provider, ORGANIZATION_LABEL, Organization,
    ProviderKind, Resource, Role, User,
};
use shared::error::CommonError;
use tokio::time::timeout;
use uuid::Uuid;

use crate::commands::manifests::{self, Manifest};

/// Administrative operations are bounded rather than open-ended.
const ADMIN_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Subcommand)]
pub enum CreateCommand {
    /// Register a downstream OAuth2 client.
    Oauth2client(CreateOAuth2Client),
    /// Configure an upstream identity provider.
    Oauth2provider(CreateOAuth2Provider),
    /// Create a tenant organization.
    Organization(CreateOrganization),
    /// Create a role.
    Role(CreateRole),
    /// Create a user within an organization.
    User(CreateUser),
    /// Create a group binding users to roles.
    Group(CreateGroup),
}

#[derive(Debug, Args)]
pub struct CommonFlags {
    /// Directory holding the resource manifests.
    #[arg(long, default_value = "manifests")]
    pub manifest_dir: PathBuf,

    /// Namespace holding the server-global resources.
    #[arg(long, default_value = "default")]
    pub namespace: String,
}

pub async fn cmd_create(command: CreateCommand) -> Result<(), CommonError> {
    match timeout(ADMIN_TIMEOUT, run(command)).await {
        Ok(result) => result,
        Err(_) => Err(CommonError::Validation {
            msg: "operation timed out".to_string(),
        }),
    }
}

async fn run(command: CreateCommand) -> Result<(), CommonError> {
    match command {
        CreateCommand::Oauth2client(params) => create_oauth2_client(params).await,
        CreateCommand::Oauth2provider(params) => create_oauth2_provider(params).await,
        CreateCommand::Organization(params) => create_organization(params).await,
        CreateCommand::Role(params) => create_role(params).await,
        CreateCommand::User(params) => create_user(params).await,
        CreateCommand::Group(params) => create_group(params).await,
    }
}

async fn load_repository(dir: &Path) -> Result<Repository, CommonError> {
    let repository = Repository::new();

    if dir.exists() {
        manifests::load_dir(&repository, dir).await?;
    }

    Ok(repository)
}

/// Resolve a resource by its human-chosen name label.
async fn get_by_name<T: Resource>(
    repository: &Repository,
    namespace: &str,
    name: &str,
) -> Result<Option<T>, CommonError> {
    let selector = LabelSelector::equals(NAME_LABEL, name);
    let items: Vec<T> = repository.list(namespace, Some(&selector)).await?;

    Ok(items.into_iter().next())
}

fn generate_resource_id() -> String {
    Uuid::new_v4().to_string()
}

fn validation(msg: String) -> CommonError {
    CommonError::Validation { msg }
}

fn write_and_report(dir: &Path, manifest: Manifest) -> Result<(), CommonError> {
    let path = manifests::write(dir, &manifest)?;
    println!("created {}", path.display());

    Ok(())
}

#[derive(Debug, Args)]
pub struct CreateOAuth2Client {
    #[command(flatten)]
    common: CommonFlags,

    /// Client identifier presented on /authorize.
    #[arg(long)]
    id: String,

    /// Exact redirect URI registered for the client.
    #[arg(long)]
    redirect_uri: String,
}

async fn create_oauth2_client(params: CreateOAuth2Client) -> Result<(), CommonError> {
    let repository = load_repository(&params.common.manifest_dir).await?;

    let clients: Vec<OAuth2Client> = repository.list(&params.common.namespace, None).await?;

    if clients.iter().any(|c| c.id == params.id) {
        return Err(validation(format!("client {} already exists", params.id)));
    }

    url::Url::parse(&params.redirect_uri)
        .map_err(|e| validation(format!("redirect_uri is not a valid URL: {e}")))?;

    let resource = OAuth2Client {
        metadata: Metadata::new(&params.common.namespace, generate_resource_id())
            .with_label(NAME_LABEL, &params.id),
        id: params.id,
        redirect_uri: params.redirect_uri,
    };

    write_and_report(&params.common.manifest_dir, Manifest::OAuth2Client(resource))
}

#[derive(Debug, Args)]
pub struct CreateOAuth2Provider {
    #[command(flatten)]
    common: CommonFlags,

    /// Provider name, referenced by organizations.
    #[arg(long)]
    name: String,

    /// Provider family. Unknown values run the generic OIDC path.
    #[arg(long, default_value = "null")]
    r#type: String,

    /// Issuer URL used for OIDC discovery.
    #[arg(long)]
    issuer: String,

    #[arg(long)]
    client_id: String,

    #[arg(long)]
    client_secret: String,
}

async fn create_oauth2_provider(params: CreateOAuth2Provider) -> Result<(), CommonError> {
    let repository = load_repository(&params.common.manifest_dir).await?;

    if get_by_name::<OAuth2Provider>(&repository, &params.common.namespace, &params.name)
        .await?
        .is_some()
    {
        return Err(validation(format!("provider {} already exists", params.name)));
    }

    url::Url::parse(&params.issuer)
        .map_err(|e| validation(format!("issuer is not a valid URL: {e}")))?;

    let kind: ProviderKind =
        serde_json::from_value(serde_json::Value::String(params.r#type.clone()))
            .map_err(|e| validation(format!("provider type is malformed: {e}")))?;

    let resource = OAuth2Provider {
        metadata: Metadata::new(&params.common.namespace, generate_resource_id())
            .with_label(NAME_LABEL, &params.name),
        kind,
        issuer: params.issuer,
        client_id: params.client_id,
        client_secret: params.client_secret,
    };

    write_and_report(
        &params.common.manifest_dir,
        Manifest::OAuth2Provider(resource),
    )
}

#[derive(Debug, Args)]
pub struct CreateOrganization {
    #[command(flatten)]
    common: CommonFlags,

    /// Organization name.
    #[arg(long)]
    name: String,

    /// Email domain routed to this organization.
    #[arg(long)]
    domain: String,

    /// Name of the identity provider the organization signs in with.
    #[arg(long)]
    provider: String,
}

async fn create_organization(params: CreateOrganization) -> Result<(), CommonError> {
    let repository = load_repository(&params.common.manifest_dir).await?;
    let namespace = &params.common.namespace;

    if get_by_name::<Organization>(&repository, namespace, &params.name)
        .await?
        .is_some()
    {
        return Err(validation(format!(
            "organization {} already exists",
            params.name
        )));
    }

    let organizations: Vec<Organization> = repository.list(namespace, None).await?;

    if organizations.iter().any(|o| o.domain == params.domain) {
        return Err(validation(format!(
            "domain {} is already claimed",
            params.domain
        )));
    }

    let provider: OAuth2Provider = get_by_name(&repository, namespace, &params.provider)
        .await?
        .ok_or_else(|| validation(format!("unable to find provider {}", params.provider)))?;

    let resource = Organization {
        metadata: Metadata::new(namespace, generate_resource_id())
            .with_label(NAME_LABEL, &params.name),
        domain: params.domain,
        provider_name: provider.metadata.name.clone(),
        namespace: format!("org-{}", params.name),
    };

    write_and_report(&params.common.manifest_dir, Manifest::Organization(resource))
}

#[derive(Debug, Args)]
pub struct CreateRole {
    #[command(flatten)]
    common: CommonFlags,

    /// Role name.
    #[arg(long)]
    name: String,

    /// Permission granted by the role, may be specified more than once.
    #[arg(long = "permission")]
    permissions: Vec<String>,
}

async fn create_role(params: CreateRole) -> Result<(), CommonError> {
    let repository = load_repository(&params.common.manifest_dir).await?;

    if get_by_name::<Role>(&repository, &params.common.namespace, &params.name)
        .await?
        .is_some()
    {
        return Err(validation(format!("role {} already exists", params.name)));
    }

    let mut permissions = params.permissions;
    permissions.sort();
    permissions.dedup();

    let resource = Role {
        metadata: Metadata::new(&params.common.namespace, generate_resource_id())
            .with_label(NAME_LABEL, &params.name),
        permissions,
    };

    write_and_report(&params.common.manifest_dir, Manifest::Role(resource))
}

#[derive(Debug, Args)]
pub struct CreateUser {
    #[command(flatten)]
    common: CommonFlags,

    /// Organization name the user belongs to.
    #[arg(long)]
    organization: String,

    /// Canonical subject, typically the user's verified email.
    #[arg(long)]
    subject: String,
}

async fn create_user(params: CreateUser) -> Result<(), CommonError> {
    let repository = load_repository(&params.common.manifest_dir).await?;

    let organization: Organization =
        get_by_name(&repository, &params.common.namespace, &params.organization)
            .await?
            .ok_or_else(|| {
                validation(format!(
                    "unable to find organization {}",
                    params.organization
                ))
            })?;

    let users: Vec<User> = repository.list(&organization.namespace, None).await?;

    if users.iter().any(|u| u.subject == params.subject) {
        return Err(validation(format!("user {} already exists", params.subject)));
    }

    let resource = User {
        metadata: Metadata::new(&organization.namespace, generate_resource_id())
            .with_label(ORGANIZATION_LABEL, &organization.metadata.name),
        subject: params.subject,
    };

    write_and_report(&params.common.manifest_dir, Manifest::User(resource))
}

#[derive(Debug, Args)]
pub struct CreateGroup {
    #[command(flatten)]
    common: CommonFlags,

    /// Organization name.
    #[arg(long)]
    organization: String,

    /// Group name.
    #[arg(long)]
    name: String,

    /// Group role, may be specified more than once.
    #[arg(long = "role", required = true)]
    roles: Vec<String>,

    /// Group user, may be specified more than once.
    #[arg(long = "user", required = true)]
    users: Vec<String>,
}

async fn create_group(params: CreateGroup) -> Result<(), CommonError> {
    let repository = load_repository(&params.common.manifest_dir).await?;
    let namespace = &params.common.namespace;

    let organization: Organization = get_by_name(&repository, namespace, &params.organization)
        .await?
        .ok_or_else(|| {
            validation(format!(
                "unable to find organization {}",
                params.organization
            ))
        })?;

    if get_by_name::<Group>(&repository, &organization.namespace, &params.name)
        .await?
        .is_some()
    {
        return Err(validation(format!(
            "expected no groups to exist with name {}",
            params.name
        )));
    }

    // Remove duplicates.
    let mut roles = params.roles;
    roles.sort();
    roles.dedup();

    let available: Vec<Role> = repository.list(namespace, None).await?;

    let mut role_ids = Vec::with_capacity(roles.len());

    for role in &roles {
        let found = available
            .iter()
            .find(|r| r.metadata.labels.get(NAME_LABEL) == Some(role))
            .ok_or_else(|| validation(format!("unable to find role {role}")))?;

        role_ids.push(found.metadata.name.clone());
    }

    // Remove duplicates.
    let mut users = params.users;
    users.sort();
    users.dedup();

    let members: Vec<User> = repository.list(&organization.namespace, None).await?;

    let mut user_ids = Vec::with_capacity(users.len());

    for user in &users {
        let found = members
            .iter()
            .find(|u| &u.subject == user)
            .ok_or_else(|| validation(format!("unable to find user {user}")))?;

        user_ids.push(found.metadata.name.clone());
    }

    let resource = Group {
        metadata: Metadata::new(&organization.namespace, generate_resource_id())
            .with_label(NAME_LABEL, &params.name)
            .with_label(ORGANIZATION_LABEL, &organization.metadata.name),
        role_ids,
        user_ids,
    };

    write_and_report(&params.common.manifest_dir, Manifest::Group(resource))
}
