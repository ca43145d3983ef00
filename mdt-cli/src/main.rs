mod auth;
mod config;
mod grade;
mod pull;
mod status;
mod submit;
mod sync;

use std::env;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mdt_lib::worktree::WorkTree;

use crate::config::{Config, Overrides};

#[derive(Parser, Debug)]
#[command(name = "mdt")]
#[command(version)]
#[command(about = "Moodle assignments from the command line", long_about = None)]
struct Args {
    /// Show debug output (overrides MDT_LOG)
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Request a web service token and save it in the global config
    Auth {
        /// Moodle user name
        #[arg(short = 'u', long = "user")]
        user: String,

        /// Moodle password
        #[arg(short = 'p', long = "password", env = "MDT_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create a work tree in the current directory
    Init {
        /// Courses to work with (default: all enrolled courses)
        #[arg(short = 'c', long = "course-ids", num_args = 1..)]
        course_ids: Vec<i64>,
    },
    /// Refresh the local cache (everything when no flag is given)
    Sync {
        #[arg(short = 'a', long = "assignments")]
        assignments: bool,

        #[arg(short = 's', long = "submissions")]
        submissions: bool,

        #[arg(short = 'g', long = "grades")]
        grades: bool,

        #[arg(short = 'u', long = "users")]
        users: bool,
    },
    /// List synced assignments with submission and grading progress
    Status {
        /// Only show these assignments
        #[arg(short = 'a', long = "assignment-ids", num_args = 1..)]
        assignment_ids: Vec<i64>,
    },
    /// Download submitted files and write a grading file
    Pull {
        /// Assignments to pull
        #[arg(required = true)]
        assignment_ids: Vec<i64>,
    },
    /// Upload the grades of grading files
    Grade {
        /// Grading files to upload
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Hand in online text and files for an assignment
    Submit {
        /// Assignment to submit to
        #[arg(short = 'a', long = "assignment-id")]
        assignment_id: i64,

        /// Online text (.md, .html and .txt set the text format)
        #[arg(short = 't', long = "text")]
        text: Option<PathBuf>,

        /// Files embedded in the online text
        #[arg(long = "text-files", num_args = 1.., requires = "text")]
        text_files: Vec<PathBuf>,

        /// Files to submit
        #[arg(short = 'f', long = "files", num_args = 1..)]
        files: Vec<PathBuf>,
    },
    /// Upload files to the draft area
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Show the resolved configuration
    Config,
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("MDT_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn work_tree() -> anyhow::Result<WorkTree> {
    Ok(WorkTree::find(&env::current_dir()?)?)
}

/// For commands that also run outside a work tree.
fn enclosing_work_tree() -> anyhow::Result<Option<WorkTree>> {
    Ok(WorkTree::find(&env::current_dir()?).ok())
}

async fn run(args: Args) -> anyhow::Result<()> {
    let overrides = &args.overrides;
    match args.cmd {
        Command::Auth { user, password } => auth::run_auth(overrides, &user, &password).await,
        Command::Init { course_ids } => auth::run_init(overrides, &course_ids).await,
        Command::Sync {
            assignments,
            submissions,
            grades,
            users,
        } => {
            let tree = work_tree()?;
            let config = Config::load(overrides, Some(&tree))?;
            let selection = sync::Selection {
                assignments,
                submissions,
                grades,
                users,
            };
            sync::run_sync(&tree, &config, &config.session()?, selection).await
        }
        Command::Status { assignment_ids } => status::run_status(&work_tree()?, &assignment_ids),
        Command::Pull { assignment_ids } => {
            let tree = work_tree()?;
            let config = Config::load(overrides, Some(&tree))?;
            pull::run_pull(&tree, &config.session()?, config.workers, &assignment_ids).await
        }
        Command::Grade { files } => {
            let tree = work_tree()?;
            let config = Config::load(overrides, Some(&tree))?;
            grade::run_grade(&tree, &config.session()?, &files).await
        }
        Command::Submit {
            assignment_id,
            text,
            text_files,
            files,
        } => {
            let tree = enclosing_work_tree()?;
            let config = Config::load(overrides, tree.as_ref())?;
            submit::run_submit(
                &config.session()?,
                assignment_id,
                text.as_deref(),
                &text_files,
                &files,
            )
            .await
        }
        Command::Upload { files } => {
            let tree = enclosing_work_tree()?;
            let config = Config::load(overrides, tree.as_ref())?;
            submit::run_upload(&config.session()?, &files).await
        }
        Command::Config => {
            let tree = enclosing_work_tree()?;
            config::run_config(overrides, tree.as_ref())
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Err(e) = run(args).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
