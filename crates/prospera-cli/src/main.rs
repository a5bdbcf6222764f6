//! Prospera terminal client.
//!
//! A thin front end over `prospera-core`: it wires up the session engine,
//! runs one command, and prints the resulting session state. All the
//! interesting behavior (token lifecycle, request authorization, role
//! checks) lives in the core library.

use std::io;

use anyhow::{anyhow, Context, Result};
use prospera_core::{
    ApiClient, AuthError, AuthManager, Config, Keychain, RegisterRequest, RegisterRole, RoleGuard,
    RouteDecision, SessionState, TokenStore,
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// HTTP request timeout in seconds.
/// 30s allows for slow responses while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

fn usage() -> ! {
    eprintln!("Usage: prospera <command>");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  login [username] [--remember]   Sign in with a password grant");
    eprintln!("  logout                          Clear the local session");
    eprintln!("  whoami                          Show the current session state");
    eprintln!("  profile                         Fetch the profile from the backend");
    eprintln!("  register <email> <first> <last> <cin> <client|freelancer>");
    eprintln!("  can <role>...                   Check route access for roles");
    std::process::exit(2);
}

struct Session {
    config: Config,
    auth: AuthManager,
    api: ApiClient,
}

fn bootstrap() -> Result<Session> {
    let config = Config::load().context("Failed to load configuration")?;

    let key = Keychain::load_or_create_store_key()
        .context("Failed to obtain the credential sealing key")?;
    let store = TokenStore::new(
        Config::credential_path().context("Failed to locate the credential store")?,
        &key,
    );

    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .context("Failed to build the HTTP client")?;

    let auth = AuthManager::new(config.clone(), store, http.clone());
    let api = ApiClient::new(config.backend_base_url.clone(), http, auth.clone());

    Ok(Session { config, auth, api })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else { usage() };

    let session = bootstrap()?;

    match command.as_str() {
        "login" => login(&session, &args[1..]).await,
        "logout" => logout(&session).await,
        "whoami" => whoami(&session).await,
        "profile" => profile(&session).await,
        "register" => register(&session, &args[1..]).await,
        "can" => can(&session, &args[1..]).await,
        _ => usage(),
    }
}

async fn login(session: &Session, args: &[String]) -> Result<()> {
    let remember = args.iter().any(|arg| arg == "--remember");
    let username = args
        .iter()
        .find(|arg| !arg.starts_with("--"))
        .cloned()
        .or_else(|| session.config.last_username.clone())
        .ok_or_else(|| anyhow!("No username given and none remembered"))?;

    let password = match Keychain::get_password(&username) {
        Ok(password) => {
            info!(%username, "using remembered password");
            password
        }
        Err(_) => rpassword::prompt_password(format!("Password for {username}: "))
            .context("Failed to read password")?,
    };

    match session.auth.login(&username, &password).await {
        Ok(()) => {}
        Err(AuthError::InvalidCredentials) => {
            return Err(anyhow!("Invalid username or password"));
        }
        Err(err) => return Err(anyhow!("Login failed: {err}")),
    }

    let mut config = session.config.clone();
    config.last_username = Some(username.clone());
    config.save().context("Failed to save configuration")?;

    if remember {
        Keychain::store_password(&username, &password)
            .context("Failed to remember the password")?;
    }

    print_state(&session.auth.session_state());
    Ok(())
}

async fn logout(session: &Session) -> Result<()> {
    session.auth.logout().await;
    if let Some(username) = &session.config.last_username {
        let _ = Keychain::delete_password(username);
    }
    println!("Logged out.");
    Ok(())
}

async fn whoami(session: &Session) -> Result<()> {
    session.auth.sync_auth_state().await;
    print_state(&session.auth.session_state());
    Ok(())
}

async fn profile(session: &Session) -> Result<()> {
    session.auth.sync_auth_state().await;
    let profile: serde_json::Value = session
        .api
        .get_json("/api/users/me")
        .await
        .context("Failed to fetch the profile")?;
    println!("{}", serde_json::to_string_pretty(&profile)?);
    Ok(())
}

async fn register(session: &Session, args: &[String]) -> Result<()> {
    let [email, first_name, last_name, cin, role] = args else {
        usage()
    };
    let role = match role.to_lowercase().as_str() {
        "client" => RegisterRole::Client,
        "freelancer" => RegisterRole::Freelancer,
        _ => usage(),
    };

    let password =
        rpassword::prompt_password("Choose a password: ").context("Failed to read password")?;

    session
        .api
        .register(&RegisterRequest {
            email: email.clone(),
            password: password.clone(),
            first_name: first_name.clone(),
            last_name: last_name.clone(),
            cin: cin.clone(),
            role,
        })
        .await
        .context("Registration failed")?;

    // Same flow as the web client: a fresh account signs in right away.
    session
        .auth
        .login(email, &password)
        .await
        .context("Registered, but the automatic login failed")?;

    print_state(&session.auth.session_state());
    Ok(())
}

async fn can(session: &Session, args: &[String]) -> Result<()> {
    if args.is_empty() {
        usage();
    }
    let guard = RoleGuard::new(session.auth.clone(), session.config.fallback_route.clone());
    match guard.check(args).await {
        RouteDecision::Permit => println!("Permitted."),
        RouteDecision::Redirect(route) => println!("Denied, redirecting to {route}."),
    }
    Ok(())
}

fn print_state(state: &SessionState) {
    if !state.is_authenticated {
        println!("Not signed in.");
        return;
    }
    println!("Signed in as {}", state.username.as_deref().unwrap_or("?"));
    if let Some(name) = &state.display_name {
        println!("  name:  {name}");
    }
    if let Some(email) = &state.email {
        println!("  email: {email}");
    }
    if let Some(role) = state.display_role() {
        println!("  role:  {role}");
    }
    if !state.roles.is_empty() {
        println!("  roles: {}", state.roles.join(", "));
    }
}
