use campus_offline::app::App;
use campus_offline::config::{Config, SESSION_TOKEN_VAR};
use campus_offline::media::DownloadRequest;
use campus_offline::session::IdentityProfile;
use campus_offline::upload::{UploadFile, UploadOutcome, UploadProgress};
use campus_offline::server;
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use futures::TryStreamExt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "campus-offline")]
#[command(about = "Offline lesson media, session continuity and uploads for the campus platform")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/campus-offline/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Download a lesson video for offline playback
  Download {
    url: String,
    #[arg(long)]
    id: String,
    #[arg(long)]
    course: String,
    #[arg(long)]
    lesson: String,
    #[arg(long)]
    title: String,
  },
  /// List downloaded media
  List {
    #[arg(long)]
    course: Option<String>,
  },
  /// Show bytes used by downloads
  Usage,
  /// Delete a download
  Remove { id: String },
  /// Write a download's payload to a file
  Export { id: String, path: PathBuf },
  /// Upload a file, picking relay or direct transport by size
  Upload {
    file: PathBuf,
    #[arg(long, default_value = "application/octet-stream")]
    mime: String,
  },
  /// Inspect or manage the cached offline identity
  Identity {
    #[command(subcommand)]
    action: IdentityAction,
  },
  /// Run the local offline proxy
  Serve {
    #[arg(long, default_value = "127.0.0.1:8787")]
    listen: SocketAddr,
  },
}

#[derive(Subcommand, Debug)]
enum IdentityAction {
  Show,
  Cache {
    #[arg(long)]
    subject: String,
    #[arg(long)]
    role: String,
    #[arg(long)]
    name: String,
    #[arg(long)]
    contact: String,
  },
  Clear,
}

fn init_logging(log_dir: &Path) -> WorkerGuard {
  let appender = tracing_appender::rolling::daily(log_dir, "campus-offline.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("campus_offline=info")),
    )
    .with_writer(writer)
    .with_ansi(false)
    .init();

  guard
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let _guard = init_logging(&config.data_dir()?);

  let app = App::new(config)?;
  run(&app, args.command).await
}

async fn run(app: &App, command: Command) -> Result<()> {
  match command {
    Command::Download {
      url,
      id,
      course,
      lesson,
      title,
    } => {
      let url = Url::parse(&url).map_err(|e| eyre!("Invalid url {}: {}", url, e))?;
      let request = DownloadRequest {
        id,
        course_id: course,
        lesson_id: lesson,
        title,
      };
      let handle = app
        .media
        .download(app.network.as_ref(), &url, request)
        .await?;
      println!("saved {} (play at {})", handle.id, handle.local_path());
    }

    Command::List { course } => {
      let entries = match course {
        Some(course) => app.media.list_course(&course).await?,
        None => app.media.list_all().try_collect::<Vec<_>>().await?,
      };
      for entry in entries {
        println!(
          "{}\t{}\t{}\t{}\t{}",
          entry.id, entry.course_id, entry.lesson_id, entry.byte_size, entry.title
        );
      }
    }

    Command::Usage => {
      println!("{}", app.media.total_bytes().await?);
    }

    Command::Remove { id } => {
      app.media.delete(&id).await?;
    }

    Command::Export { id, path } => {
      let object = app.media.get(&id).await?;
      tokio::fs::write(&path, &object.payload)
        .await
        .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?;
      println!("wrote {} bytes to {}", object.byte_size, path.display());
    }

    Command::Upload { file, mime } => upload(app, &file, mime).await?,

    Command::Identity { action } => match action {
      IdentityAction::Show => match app.session.read().await? {
        Some(identity) => println!("{}", serde_json::to_string_pretty(&identity)?),
        None => println!("no cached identity"),
      },
      IdentityAction::Cache {
        subject,
        role,
        name,
        contact,
      } => {
        let identity = app
          .session
          .cache(IdentityProfile {
            subject_id: subject,
            role,
            display_name: name,
            contact_address: contact,
          })
          .await?;
        println!("cached until {}", identity.expires_at());
      }
      IdentityAction::Clear => app.session.clear().await?,
    },

    Command::Serve { listen } => server::serve(app, listen).await?,
  }

  Ok(())
}

async fn upload(app: &App, path: &Path, mime_type: String) -> Result<()> {
  let payload = tokio::fs::read(path)
    .await
    .map_err(|e| eyre!("Failed to read {}: {}", path.display(), e))?;
  let file_name = path
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .ok_or_else(|| eyre!("Not a file: {}", path.display()))?;

  let token = Config::session_token();
  if token.is_none() {
    tracing::debug!("{} not set, direct uploads will be refused", SESSION_TOKEN_VAR);
  }

  let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<UploadProgress>();
  let printer = tokio::spawn(async move {
    while let Some(progress) = rx.recv().await {
      eprint!("\r{}", progress_line(&progress));
    }
    eprintln!();
  });

  let selector = app.uploader(token)?;
  let file = UploadFile {
    file_name,
    mime_type,
    payload,
  };
  let outcome = selector.upload(&file, Some(tx)).await;
  let _ = printer.await;

  match outcome {
    UploadOutcome::Success { url } => {
      println!("{}", url);
      Ok(())
    }
    UploadOutcome::Failure { reason, detail } => {
      Err(eyre!("upload failed ({:?}): {}", reason, detail))
    }
  }
}

fn progress_line(progress: &UploadProgress) -> String {
  format!("{:?}: {}/{} bytes", progress.transport, progress.sent, progress.total)
}

#[cfg(test)]
mod tests {
  use super::*;
  use campus_offline::upload::Transport;

  #[test]
  fn test_progress_line_names_transport_and_bytes() {
    let progress = UploadProgress {
      transport: Transport::Direct,
      sent: 65536,
      total: 5_000_000,
    };
    assert_eq!(progress_line(&progress), "Direct: 65536/5000000 bytes");
  }
}
