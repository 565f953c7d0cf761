use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand, ValueEnum};
use shop_core::auth::{
    AuthError, LoopbackPresenter, ManualPresenter, OAuthSessionController, PreferredPresenter,
    PresenterPreference,
};
use shop_core::config::{ConfigLocator, FlowSettings};
use shop_core::connection::{ConfigurationLoader, InputRequest, ProviderSelection};
use shop_core::flow::{
    AppLaunchManager, Launch, LoginInteraction, OnboardingError, OnboardingInteraction,
    OnboardingState, WelcomeChoice,
};
use shop_core::policy::{PasscodePolicy, PasscodePolicyResolver, PolicyViolation};
use tokio::task;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Parser, Debug)]
#[command(author, version, about = "Storefront onboarding and login")]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, global = true)]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Pretty,
    Compact,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect to a backend, sign in and create a passcode
    Onboard(OnboardArgs),
    /// Unlock the secure store with the passcode
    Login,
    /// Show whether the app is onboarded
    Status,
    /// Lock the secure store, keeping data for the next login
    Logout,
    /// Remove all stored data; onboarding is required afterwards
    Disconnect,
}

#[derive(Args, Debug)]
struct OnboardArgs {
    /// Configuration providers to try (managed, file, discovery, qr)
    #[arg(long, default_value = "file,qr")]
    providers: ProviderSelection,
    /// Connection JSON file used by the file provider
    #[arg(long = "config-file")]
    config_file: Option<PathBuf>,
    /// Skip onboarding and browse in demo mode
    #[arg(long)]
    demo: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let locator = ConfigLocator::new().context("unable to initialise config directory")?;
    let settings = FlowSettings::from_env().context("invalid SHOP_* settings")?;
    let launcher = AppLaunchManager::from_locator(&locator, settings);

    match cli.command {
        Commands::Onboard(args) => onboard(&launcher, &locator, args).await?,
        Commands::Login => login(&launcher).await?,
        Commands::Status => status(&launcher).await?,
        Commands::Logout => {
            launcher.logout().await.context("failed to log out")?;
            println!("Logged out.");
        }
        Commands::Disconnect => {
            launcher
                .disconnect()
                .await
                .context("failed to remove stored data")?;
            println!("All stored data removed. Run `shop onboard` to connect again.");
        }
    }
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn onboard(
    launcher: &AppLaunchManager,
    locator: &ConfigLocator,
    args: OnboardArgs,
) -> Result<()> {
    if let Launch::Login(_) = launcher.launch().await? {
        bail!("already onboarded; run `shop login` or `shop disconnect` first");
    }

    let settings = launcher.settings();
    let config_file = args
        .config_file
        .unwrap_or_else(|| locator.configuration_file());
    let loader = ConfigurationLoader::with_selection(args.providers, config_file, settings)
        .context("failed to set up configuration providers")?;

    let preference = PresenterPreference::detect();
    let open_browser = preference.browser_available();
    let presenter = PreferredPresenter::new(
        preference,
        Arc::new(LoopbackPresenter::new(
            open_browser,
            Arc::new(print_authorization_url),
        )),
        Arc::new(ManualPresenter::new(
            open_browser,
            print_authorization_url,
            prompt_for_redirect,
        )),
    );
    let authenticator = OAuthSessionController::new(Arc::new(presenter), settings.network_timeout);

    let mut flow = launcher.onboarding_flow(
        loader,
        Arc::new(authenticator),
        Arc::new(PasscodePolicyResolver),
    );
    let terminal = Terminal { demo: args.demo };
    let result = match flow.run(&terminal).await {
        Ok(result) => result,
        Err(OnboardingError::AbortedForDemoMode) => {
            println!("Continuing in demo mode; nothing was stored.");
            return Ok(());
        }
        Err(err) => return Err(err).context("onboarding failed"),
    };

    launcher
        .complete_onboarding(&result)
        .context("failed to record onboarding")?;
    println!(
        "Onboarding complete. Connected to {} as app '{}'.",
        result.connection_parameters().server_url(),
        result.connection_parameters().app_id()
    );
    Ok(())
}

async fn login(launcher: &AppLaunchManager) -> Result<()> {
    let Launch::Login(mut flow) = launcher.launch().await? else {
        bail!("not onboarded yet; run `shop onboard` first");
    };

    if flow.run(&Terminal { demo: false }).await.is_none() {
        bail!("login aborted");
    }
    let transport = launcher
        .complete_login(&flow)
        .context("failed to build transport session")?;
    let token = transport
        .current_token()
        .await
        .context("no usable token in the secure store")?;

    println!("Unlocked. Requests go to {}.", transport.server_url());
    if let Some(expiry) = token.expires_at {
        println!("Access token expires at {} (UTC).", expiry);
    }
    Ok(())
}

async fn status(launcher: &AppLaunchManager) -> Result<()> {
    match launcher.launch().await? {
        Launch::Onboarding => println!("Not onboarded."),
        Launch::Login(flow) => {
            let connection = flow.connection_parameters();
            println!("Onboarded as app '{}'.", connection.app_id());
            println!("Server: {}", connection.server_url());
        }
    }
    Ok(())
}

/// Onboarding and login prompts on stdin/stdout.
struct Terminal {
    demo: bool,
}

#[async_trait]
impl OnboardingInteraction for Terminal {
    async fn welcome(&self) -> WelcomeChoice {
        if self.demo {
            return WelcomeChoice::DemoMode;
        }
        println!("Welcome. Let's connect this device to your store.");
        WelcomeChoice::Continue
    }

    async fn provide_input(&self, request: &InputRequest) -> Option<BTreeMap<String, String>> {
        println!("The {} provider needs input (leave empty to skip).", request.provider);
        let mut values = BTreeMap::new();
        for key in &request.keys {
            let value = prompt(format!("{key}: ")).await.ok()?;
            if value.is_empty() {
                return None;
            }
            values.insert((*key).to_owned(), value);
        }
        Some(values)
    }

    async fn create_passcode(&self, policy: &PasscodePolicy) -> Option<String> {
        println!("{}", describe_policy(policy));
        let passcode = prompt("New passcode: ".to_owned()).await.ok()?;
        if passcode.is_empty() {
            return None;
        }
        Some(passcode)
    }

    async fn passcode_rejected(&self, violation: PolicyViolation) {
        eprintln!("Passcode rejected: {violation}.");
    }

    async fn state_changed(&self, state: OnboardingState) {
        debug!(?state, "onboarding state changed");
    }
}

#[async_trait]
impl LoginInteraction for Terminal {
    async fn request_passcode(&self, _attempt: u32) -> Option<String> {
        let passcode = prompt("Passcode: ".to_owned()).await.ok()?;
        if passcode.is_empty() {
            return None;
        }
        Some(passcode)
    }

    async fn passcode_rejected(&self, attempt: u32) {
        eprintln!("Wrong passcode (attempt {attempt}).");
    }
}

fn describe_policy(policy: &PasscodePolicy) -> String {
    let mut rules = vec![format!("at least {} characters", policy.min_length)];
    if policy.digits_only {
        rules.push("digits only".to_owned());
    }
    if policy.require_upper {
        rules.push("an upper-case letter".to_owned());
    }
    if policy.require_lower {
        rules.push("a lower-case letter".to_owned());
    }
    if policy.require_special {
        rules.push("a special character".to_owned());
    }
    format!("Choose a passcode: {}.", rules.join(", "))
}

async fn prompt(label: String) -> std::io::Result<String> {
    task::spawn_blocking(move || {
        use std::io::{self, Write};
        print!("{label}");
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        Ok(input.trim().to_owned())
    })
    .await
    .map_err(std::io::Error::other)?
}

async fn prompt_for_redirect() -> Result<String, AuthError> {
    prompt("Paste the redirect URL or authorization code: ".to_owned())
        .await
        .map_err(AuthError::Io)
}

fn print_authorization_url(url: &Url) -> Result<(), AuthError> {
    println!("\nAuthorize the application by visiting:\n  {}\n", url);
    Ok(())
}
