use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use console::Term;
use log::{debug, info};
use serde::Serialize;

use crate::actions::Notice;
use crate::api::ApiClient;
use crate::config::{Config, OutputFormat};
use crate::error::PipewatchError;
use crate::events::{SocketIoTransport, SubscriptionManager};
use crate::forms::PipelineDraft;
use crate::guard::{self, Route};
use crate::output::{self, LoadingSpinner};
use crate::session::Session;
use crate::sync::{BoardView, DetailView};
use crate::views::StatusFilter;

#[derive(Parser)]
#[command(name = "pipewatch")]
#[command(author, version, about = "CI/CD pipeline dashboard", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Backend base URL
    #[arg(short, long, global = true, env = "PIPEWATCH_URL")]
    url: Option<String>,

    /// Configuration file (defaults to ./pipewatch.{toml,json,yaml,yml})
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[arg(short, long, global = true, value_enum)]
    format: Option<OutputFormat>,

    #[arg(short, long, global = true, default_value_t = false)]
    pretty: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and store the session credential
    Login {
        #[arg(long, env = "PIPEWATCH_USERNAME")]
        username: Option<String>,

        #[arg(long, env = "PIPEWATCH_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Forget the stored credential
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Pipeline counts, execution rates and recent activity
    Dashboard,
    /// List pipelines
    Pipelines {
        #[arg(short = 's', long, value_enum, default_value_t)]
        filter: StatusFilter,
    },
    /// Show one pipeline with its steps, history and latest logs
    Show { id: u64 },
    /// Create a pipeline
    Create {
        #[arg(short, long)]
        name: String,

        #[arg(short, long, default_value = "")]
        description: String,

        #[arg(long, default_value = "")]
        repo_url: String,

        #[arg(short, long, default_value = crate::forms::DEFAULT_BRANCH)]
        branch: String,

        /// Pipeline step as `NAME=COMMAND`, or just `COMMAND`. Repeatable.
        #[arg(long = "step", value_name = "NAME=COMMAND")]
        steps: Vec<String>,
    },
    /// Trigger a pipeline run
    Run { id: u64 },
    /// Delete a pipeline
    Delete {
        id: u64,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Recent builds across all pipelines
    Builds,
    /// Stored output of one build
    Logs { build_id: u64 },
    /// Latest build output across all pipelines
    Activity,
    /// Follow live updates for the dashboard, or for one pipeline
    Watch { id: Option<u64> },
}

impl Cli {
    pub async fn execute(&self) -> Result<()> {
        let config = Config::load(self.config.as_deref())?;
        let session = Session::open(config.session.store()?);
        let base_url = self.url.as_deref().unwrap_or(&config.api.base_url);
        let api = ApiClient::new(base_url, config.api.timeout(), session)
            .with_context(|| format!("Invalid backend URL: {base_url}"))?;

        let printer = Printer {
            format: self.format.unwrap_or(config.output.format),
            pretty: self.pretty || config.output.pretty,
        };

        match &self.command {
            Commands::Login { username, password } => {
                login(&api, username.as_deref(), password.as_deref(), &printer).await
            }
            Commands::Logout => {
                api.session().sign_out()?;
                eprintln!("{}", output::dim("Signed out"));
                Ok(())
            }
            Commands::Whoami => whoami(&api, &printer).await,
            Commands::Dashboard => dashboard(api, &printer).await,
            Commands::Pipelines { filter } => pipelines(api, *filter, &printer).await,
            Commands::Show { id } => show(api, *id, &printer).await,
            Commands::Create {
                name,
                description,
                repo_url,
                branch,
                steps,
            } => {
                let draft = draft_from_args(name, description, repo_url, branch, steps)?;
                create(&api, &draft, &printer).await
            }
            Commands::Run { id } => run(api, *id, &printer).await,
            Commands::Delete { id, yes } => delete(api, *id, *yes, &printer).await,
            Commands::Builds => builds(api, &printer).await,
            Commands::Logs { build_id } => logs(&api, *build_id, &printer).await,
            Commands::Activity => activity(&api, &printer).await,
            Commands::Watch { id } => watch(api, *id, &printer).await,
        }
    }
}

struct Printer {
    format: OutputFormat,
    pretty: bool,
}

impl Printer {
    fn emit<T: Serialize + ?Sized>(&self, value: &T, render: impl FnOnce(&T) -> String) -> Result<()> {
        match self.format {
            OutputFormat::Summary => print!("{}", render(value)),
            OutputFormat::Json if self.pretty => println!("{}", serde_json::to_string_pretty(value)?),
            OutputFormat::Json => println!("{}", serde_json::to_string(value)?),
        }
        Ok(())
    }

    /// Print a mutation outcome; an error notice fails the command.
    fn notice(&self, notice: &Notice) -> Result<()> {
        self.emit(notice, |n| format!("{}\n", output::render_notice(n)))?;
        if !notice.is_success() {
            bail!("{}", notice.title);
        }
        Ok(())
    }
}

async fn login(
    api: &ApiClient,
    username: Option<&str>,
    password: Option<&str>,
    printer: &Printer,
) -> Result<()> {
    let term = Term::stderr();
    let username = match username {
        Some(username) => username.to_string(),
        None => {
            term.write_str("Username: ")?;
            term.read_line()?
        }
    };
    let password = match password {
        Some(password) => password.to_string(),
        None => {
            term.write_str("Password: ")?;
            term.read_secure_line()?
        }
    };

    api.login(username.trim(), &password).await?;
    info!("Signed in as {}", username.trim());

    match api.me().await? {
        Some(user) => printer.emit(&user, |u| format!("{}\n", output::render_user(u))),
        None => {
            eprintln!("{}", output::dim("Signed in"));
            Ok(())
        }
    }
}

async fn whoami(api: &ApiClient, printer: &Printer) -> Result<()> {
    guard::require(api.session(), Route::Dashboard)?;
    match api.me().await? {
        Some(user) => printer.emit(&user, |u| format!("{}\n", output::render_user(u))),
        None => bail!("The server does not know the signed-in user"),
    }
}

async fn mount_board(
    api: ApiClient,
    route: Route,
    what: &str,
    subscriptions: Option<&SubscriptionManager>,
) -> Result<BoardView> {
    let spinner = LoadingSpinner::start(what);
    match BoardView::mount(api, route, subscriptions).await {
        Ok(view) => {
            spinner.finish(what);
            Ok(view)
        }
        Err(e) => {
            spinner.fail(what);
            Err(e.into())
        }
    }
}

async fn mount_detail(
    api: ApiClient,
    id: u64,
    subscriptions: Option<&SubscriptionManager>,
) -> Result<DetailView> {
    let what = format!("pipeline #{id}");
    let spinner = LoadingSpinner::start(&what);
    match DetailView::mount(api, id, subscriptions).await {
        Ok(view) => {
            spinner.finish(&what);
            Ok(view)
        }
        Err(e) => {
            spinner.fail(&what);
            Err(e.into())
        }
    }
}

async fn dashboard(api: ApiClient, printer: &Printer) -> Result<()> {
    let view = mount_board(api, Route::Dashboard, "dashboard", None).await?;
    printer.emit(&view.report(), output::render_dashboard)
}

async fn pipelines(api: ApiClient, filter: StatusFilter, printer: &Printer) -> Result<()> {
    let view = mount_board(api, Route::Pipelines, "pipelines", None).await?;
    printer.emit(view.pipelines(filter).as_slice(), |p| {
        output::render_pipelines(p, filter)
    })
}

async fn show(api: ApiClient, id: u64, printer: &Printer) -> Result<()> {
    let view = mount_detail(api, id, None).await?;
    printer.emit(&view.snapshot(), output::render_detail)?;
    if view.is_missing() {
        bail!("Pipeline #{id} not found");
    }
    Ok(())
}

fn draft_from_args(
    name: &str,
    description: &str,
    repo_url: &str,
    branch: &str,
    steps: &[String],
) -> Result<PipelineDraft> {
    let mut draft = PipelineDraft::new(name);
    draft.description = description.to_string();
    draft.repo_url = repo_url.to_string();
    draft.branch = branch.to_string();

    if !steps.is_empty() {
        // Supplied steps replace the form's placeholder step
        draft.remove_step(0);
    }
    for raw in steps {
        draft.add_step();
        let index = draft.steps.len() - 1;
        match raw.split_once('=') {
            Some((step_name, cmd)) => draft.set_step(index, step_name, cmd)?,
            None => draft.steps[index].cmd = raw.clone(),
        }
    }

    Ok(draft)
}

async fn create(api: &ApiClient, draft: &PipelineDraft, printer: &Printer) -> Result<()> {
    guard::require(api.session(), Route::NewPipeline)?;
    let notice = draft.submit(api).await?;
    printer.notice(&notice)
}

async fn run(api: ApiClient, id: u64, printer: &Printer) -> Result<()> {
    // The view only supplies the status shown after the run; a failed read
    // leaves it empty and the run goes ahead regardless.
    let view = mount_detail(api, id, None).await?;

    let notice = view.run().await?;
    printer.notice(&notice)?;
    if let (OutputFormat::Summary, Some(pipeline)) = (printer.format, view.pipeline()) {
        println!(
            "{} #{} {}",
            output::dim("Status:"),
            view.id(),
            output::status(pipeline.status)
        );
    }
    Ok(())
}

async fn delete(api: ApiClient, id: u64, yes: bool, printer: &Printer) -> Result<()> {
    let view = mount_board(api, Route::Pipelines, "pipelines", None).await?;
    let pending = view.request_delete(id);

    if !yes {
        let term = Term::stderr();
        term.write_str(&format!("{} [y/N] ", pending.prompt()))?;
        let answer = term.read_line()?;
        if !matches!(answer.trim(), "y" | "Y" | "yes") {
            eprintln!("{}", output::dim("Aborted"));
            return Ok(());
        }
    }

    let notice = view.confirm_delete(pending).await?;
    printer.notice(&notice)?;

    if printer.format == OutputFormat::Summary {
        print!(
            "{}",
            output::render_pipelines(&view.pipelines(StatusFilter::All), StatusFilter::All)
        );
    }
    Ok(())
}

async fn builds(api: ApiClient, printer: &Printer) -> Result<()> {
    let view = mount_board(api, Route::Builds, "builds", None).await?;
    printer.emit(view.recent_builds().as_slice(), |b| output::render_builds(b))
}

/// One read behind a spinner, for commands that show a list without a view.
async fn fetch<T>(
    what: &str,
    request: impl Future<Output = crate::error::Result<T>>,
) -> Result<T> {
    let spinner = LoadingSpinner::start(what);
    match request.await {
        Ok(value) => {
            spinner.finish(what);
            Ok(value)
        }
        Err(e) => {
            spinner.fail(what);
            Err(e.into())
        }
    }
}

async fn logs(api: &ApiClient, build_id: u64, printer: &Printer) -> Result<()> {
    guard::require(api.session(), Route::BuildLogs(build_id))?;
    let what = format!("logs of build #{build_id}");
    let lines = fetch(&what, api.list_build_logs(build_id)).await?;
    printer.emit(lines.as_slice(), |l| output::render_build_logs(l))
}

async fn activity(api: &ApiClient, printer: &Printer) -> Result<()> {
    guard::require(api.session(), Route::Activity)?;
    let entries = fetch("activity", api.list_activity()).await?;
    printer.emit(entries.as_slice(), |e| output::render_activity(e))
}

async fn watch(api: ApiClient, id: Option<u64>, printer: &Printer) -> Result<()> {
    let transport = SocketIoTransport::new(api.base_url())?;
    info!("Listening for events on {}", transport.url());
    let subscriptions = SubscriptionManager::new(Arc::new(transport));

    match id {
        Some(id) => watch_detail(api, id, &subscriptions, printer).await,
        None => watch_board(api, &subscriptions, printer).await,
    }
}

/// End of the event stream. A channel that refused the credential has
/// already signed the session out.
fn channel_closed(session: &Session) -> Result<()> {
    if !session.is_authenticated() {
        return Err(PipewatchError::Unauthorized.into());
    }
    eprintln!("{}", output::dim("Event channel closed"));
    Ok(())
}

async fn watch_board(
    api: ApiClient,
    subscriptions: &SubscriptionManager,
    printer: &Printer,
) -> Result<()> {
    let session = api.session().clone();
    let mut view = mount_board(api, Route::Watch, "dashboard", Some(subscriptions)).await?;
    if view.is_live() {
        debug!("{} event channel(s) open", subscriptions.active_channels());
        eprintln!("{}", output::dim("Watching for updates, Ctrl-C to stop"));
    }
    printer.emit(&view.report(), output::render_dashboard)?;

    let mut login = session.watch_login();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Ok(()) = login.changed() => {
                if *login.borrow_and_update() {
                    return Err(PipewatchError::Unauthorized.into());
                }
            }
            event = view.next_event() => match event {
                Some(Ok(event)) => {
                    printer.emit(&event, output::render_event)?;
                    if printer.format == OutputFormat::Summary {
                        println!();
                    }
                    if event.invalidates_snapshot() {
                        printer.emit(&view.report(), output::render_dashboard)?;
                    }
                }
                Some(Err(e)) => return Err(e.into()),
                None => return channel_closed(&session),
            }
        }
    }

    view.unmount();
    Ok(())
}

async fn watch_detail(
    api: ApiClient,
    id: u64,
    subscriptions: &SubscriptionManager,
    printer: &Printer,
) -> Result<()> {
    let session = api.session().clone();
    let mut view = mount_detail(api, id, Some(subscriptions)).await?;
    if view.is_live() {
        debug!("{} event channel(s) open", subscriptions.active_channels());
        eprintln!("{}", output::dim("Watching for updates, Ctrl-C to stop"));
    }
    printer.emit(&view.snapshot(), output::render_detail)?;

    let mut login = session.watch_login();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Ok(()) = login.changed() => {
                if *login.borrow_and_update() {
                    return Err(PipewatchError::Unauthorized.into());
                }
            }
            event = view.next_event() => match event {
                Some(Ok(event)) => {
                    printer.emit(&event, output::render_event)?;
                    if printer.format == OutputFormat::Summary {
                        println!();
                    }
                    if event.invalidates_snapshot() {
                        printer.emit(&view.snapshot(), output::render_detail)?;
                    }
                }
                Some(Err(e)) => return Err(e.into()),
                None => return channel_closed(&session),
            }
        }
    }

    view.unmount();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Step;
    use crate::session::{CredentialStore, Token};
    use std::time::Duration;

    fn summary() -> Printer {
        Printer {
            format: OutputFormat::Summary,
            pretty: false,
        }
    }

    fn signed_in_client(server: &mockito::ServerGuard) -> ApiClient {
        let session = Session::open(CredentialStore::in_memory());
        session.sign_in(Token::from("t")).unwrap();
        ApiClient::new(&server.url(), Duration::from_secs(5), session).unwrap()
    }

    #[test]
    fn test_parse_commands() {
        let cli = Cli::try_parse_from(["pipewatch", "pipelines", "--filter", "failed"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Pipelines {
                filter: StatusFilter::Failed
            }
        ));

        let cli = Cli::try_parse_from(["pipewatch", "delete", "3", "--yes", "--format", "json"])
            .unwrap();
        assert!(matches!(cli.command, Commands::Delete { id: 3, yes: true }));
        assert_eq!(cli.format, Some(OutputFormat::Json));

        let cli = Cli::try_parse_from(["pipewatch", "logs", "12"]).unwrap();
        assert!(matches!(cli.command, Commands::Logs { build_id: 12 }));

        let cli = Cli::try_parse_from(["pipewatch", "watch"]).unwrap();
        assert!(matches!(cli.command, Commands::Watch { id: None }));
    }

    #[test]
    fn test_idle_is_not_a_filter() {
        assert!(Cli::try_parse_from(["pipewatch", "pipelines", "--filter", "idle"]).is_err());
    }

    #[test]
    fn test_draft_from_args() {
        let steps = vec!["Build=cargo build".to_string(), "cargo test".to_string()];
        let draft = draft_from_args("api", "", "", "main", &steps).unwrap();

        assert_eq!(
            draft.steps,
            vec![
                Step::new("Build", "cargo build"),
                Step::new("Step 2", "cargo test")
            ]
        );
        assert!(draft.validate().is_ok());
    }

    #[test]
    fn test_unnamed_steps_are_numbered_by_position() {
        let steps = vec!["make".to_string(), "Ship=make ship".to_string()];
        let draft = draft_from_args("api", "", "", "main", &steps).unwrap();

        assert_eq!(
            draft.steps,
            vec![Step::new("Step 1", "make"), Step::new("Ship", "make ship")]
        );
    }

    #[test]
    fn test_draft_without_steps_keeps_default_step() {
        let draft = draft_from_args("api", "", "", "main", &[]).unwrap();
        assert_eq!(draft.steps, vec![Step::new("Build", "")]);
        assert!(draft.validate().is_err());
    }

    #[tokio::test]
    async fn test_run_is_sent_even_when_pipeline_read_fails() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/pipelines/4")
            .with_status(500)
            .create_async()
            .await;
        let trigger = server
            .mock("POST", "/api/pipelines/4/run")
            .with_status(202)
            .with_body(r#"{"build_id": 31}"#)
            .expect(1)
            .create_async()
            .await;

        let result = run(signed_in_client(&server), 4, &summary()).await;

        assert!(result.is_ok(), "{result:?}");
        trigger.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejected_run_fails_the_command() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/pipelines/4")
            .with_status(200)
            .with_body(r#"{"id": 4, "name": "api", "status": "idle"}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/api/pipelines/4/run")
            .with_status(500)
            .create_async()
            .await;

        let err = run(signed_in_client(&server), 4, &summary()).await.unwrap_err();
        assert_eq!(err.to_string(), "Pipeline Failed");
    }

    #[tokio::test]
    async fn test_activity_requires_credential() {
        let mut server = mockito::Server::new_async().await;
        let feed = server
            .mock("GET", "/api/activity-logs")
            .expect(0)
            .create_async()
            .await;
        let session = Session::open(CredentialStore::in_memory());
        let api = ApiClient::new(&server.url(), Duration::from_secs(5), session).unwrap();

        assert!(activity(&api, &summary()).await.is_err());
        feed.assert_async().await;
    }

    #[tokio::test]
    async fn test_logs_prints_build_output() {
        let mut server = mockito::Server::new_async().await;
        let logs_mock = server
            .mock("GET", "/api/builds/12/logs")
            .with_status(200)
            .with_body(r#"[{"step_index": 0, "text": "ok", "timestamp": null}]"#)
            .create_async()
            .await;

        logs(&signed_in_client(&server), 12, &summary()).await.unwrap();
        logs_mock.assert_async().await;
    }

    #[test]
    fn test_closed_channel_after_refusal_is_an_error() {
        let session = Session::open(CredentialStore::in_memory());
        let err = channel_closed(&session).unwrap_err();
        assert!(err.to_string().contains("Run `pipewatch login` again"));

        session.sign_in(Token::from("t")).unwrap();
        assert!(channel_closed(&session).is_ok());
    }
}
