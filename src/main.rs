use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use sqlx::PgPool;

use pdireg_lib::auth::Session;
use pdireg_lib::commands;
use pdireg_lib::config::Config;
use pdireg_lib::export::EXPORT_FILE_NAME;
use pdireg_lib::model::{decode_recorded_at, Role, SubGroup, VehicleType};
use pdireg_lib::records::{RecordDraft, RecordFilter, RecordPatch};
use pdireg_lib::storage::{StorageClient, UploadFile};
use pdireg_lib::users::NewUser;

#[derive(Parser)]
#[command(name = "pdireg", about = "PDI inspection record registry")]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, value_name = "PATH", default_value = "pdireg.toml")]
    config: PathBuf,

    /// Username for authenticated commands (falls back to PDIREG_USER)
    #[arg(long, value_name = "NAME")]
    login: Option<String>,

    /// Password for authenticated commands (falls back to PDIREG_PASSWORD)
    #[arg(long, value_name = "SECRET")]
    password: Option<String>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Apply pending schema migrations and seed the bootstrap admin
    Migrate,
    /// List records matching the filters, one JSON object per line
    List {
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Create a record, optionally uploading photo files
    Add {
        #[command(flatten)]
        fields: RecordArgs,
        /// Photo files to upload to object storage
        #[arg(long = "photo", value_name = "PATH")]
        photos: Vec<PathBuf>,
        /// Photo URIs to reference without uploading
        #[arg(long = "photo-url", value_name = "URI")]
        photo_urls: Vec<String>,
    },
    /// Overwrite the mutable fields of a record (admin only)
    Edit {
        #[arg(value_name = "ID")]
        id: i64,
        #[command(flatten)]
        fields: RecordArgs,
        /// Photo files to upload and append to the record
        #[arg(long = "photo", value_name = "PATH")]
        photos: Vec<PathBuf>,
        /// Photo URIs to append without uploading
        #[arg(long = "photo-url", value_name = "URI")]
        photo_urls: Vec<String>,
    },
    /// Print one record as JSON
    Show {
        #[arg(value_name = "ID")]
        id: i64,
    },
    /// Delete a record (admin only)
    Rm {
        #[arg(value_name = "ID")]
        id: i64,
    },
    /// Export the filtered records as an XLSX workbook
    Export {
        #[command(flatten)]
        filters: FilterArgs,
        /// Output path
        #[arg(long, value_name = "PATH", default_value = EXPORT_FILE_NAME)]
        out: PathBuf,
    },
    /// Manage user accounts (admin only)
    User {
        #[command(subcommand)]
        cmd: UserCmd,
    },
}

#[derive(Subcommand)]
enum UserCmd {
    /// Create a user
    Add {
        #[arg(value_name = "NAME")]
        username: String,
        #[arg(long, value_name = "SECRET")]
        password: String,
        /// Grant the admin role
        #[arg(long)]
        admin: bool,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Delete a user
    Rm {
        #[arg(value_name = "NAME")]
        username: String,
    },
    /// List users
    Ls,
}

#[derive(Args)]
struct FilterArgs {
    /// Chassis number substring, case-insensitive
    #[arg(long, value_name = "TEXT")]
    chassis: Option<String>,
    /// Inclusive range start, dd-mm-YYYY (default: 7 days ago)
    #[arg(long, value_name = "DATE")]
    from: Option<String>,
    /// Inclusive range end, dd-mm-YYYY (default: today)
    #[arg(long, value_name = "DATE")]
    to: Option<String>,
    /// Sub-group, e.g. Paint
    #[arg(long, value_name = "NAME")]
    sub_group: Option<String>,
    /// Defect location substring
    #[arg(long, value_name = "NAME")]
    defect_location: Option<String>,
    /// Exact creator username
    #[arg(long, value_name = "NAME")]
    recorded_by: Option<String>,
    /// Vehicle type, e.g. Travego
    #[arg(long, value_name = "NAME")]
    vehicle_type: Option<String>,
}

impl FilterArgs {
    fn into_filter(self) -> Result<RecordFilter> {
        let mut filter = RecordFilter::default_window();
        if let Some(from) = &self.from {
            filter.date_from = decode_recorded_at(from)?;
        }
        if let Some(to) = &self.to {
            filter.date_to = decode_recorded_at(to)?;
        }
        filter.chassis_contains = self.chassis;
        filter.sub_group = self.sub_group.as_deref().map(SubGroup::parse).transpose()?;
        filter.defect_location = self.defect_location;
        filter.recorded_by = self.recorded_by;
        filter.vehicle_type = self
            .vehicle_type
            .as_deref()
            .map(VehicleType::parse)
            .transpose()?;
        Ok(filter)
    }
}

#[derive(Args)]
struct RecordArgs {
    #[arg(long, value_name = "TEXT", default_value = "")]
    bb: String,
    #[arg(long, value_name = "TEXT")]
    chassis: String,
    #[arg(long, value_name = "NAME")]
    vehicle_type: String,
    #[arg(long, value_name = "TEXT", default_value = "")]
    work_order: String,
    #[arg(long, value_name = "NAME")]
    sub_group: String,
    #[arg(long, value_name = "TEXT", default_value = "")]
    findings: String,
    /// Defect location tag; repeat for multiple
    #[arg(long = "defect-location", value_name = "NAME")]
    defect_locations: Vec<String>,
    /// Inspection date, dd-mm-YYYY (default: today)
    #[arg(long, value_name = "DATE")]
    date: Option<String>,
}

impl RecordArgs {
    fn recorded_at(&self) -> Result<chrono::NaiveDate> {
        match &self.date {
            Some(raw) => Ok(decode_recorded_at(raw)?),
            None => Ok(chrono::Utc::now().date_naive()),
        }
    }

    fn into_draft(self, photo_urls: Vec<String>) -> Result<RecordDraft> {
        let recorded_at = self.recorded_at()?;
        Ok(RecordDraft {
            bb_number: self.bb,
            chassis_number: self.chassis,
            vehicle_type: VehicleType::parse(&self.vehicle_type)?,
            work_order_number: self.work_order,
            sub_group: SubGroup::parse(&self.sub_group)?,
            findings: self.findings,
            defect_locations: self.defect_locations,
            photo_references: photo_urls,
            recorded_at,
        })
    }

    fn into_patch(self, photo_urls: Vec<String>) -> Result<RecordPatch> {
        let recorded_at = self.recorded_at()?;
        Ok(RecordPatch {
            bb_number: self.bb,
            chassis_number: self.chassis,
            vehicle_type: VehicleType::parse(&self.vehicle_type)?,
            work_order_number: self.work_order,
            sub_group: SubGroup::parse(&self.sub_group)?,
            findings: self.findings,
            defect_locations: self.defect_locations,
            recorded_at,
            new_photo_references: photo_urls,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    pdireg_lib::init_logging();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    let pool = pdireg_lib::db::open_pg_pool(&config.database).await?;
    let storage = config.storage.as_ref().map(StorageClient::new);

    match cli.cmd {
        Cmd::Migrate => {
            pdireg_lib::migrate::apply_migrations(&pool).await?;
            println!("schema up to date");
        }
        Cmd::List { filters } => {
            authenticate(&pool, &cli.login, &cli.password).await?;
            let filter = filters.into_filter()?;
            for record in commands::records_list(&pool, &filter).await? {
                println!("{}", serde_json::to_string(&record)?);
            }
        }
        Cmd::Add {
            fields,
            photos,
            photo_urls,
        } => {
            let session = authenticate(&pool, &cli.login, &cli.password).await?;
            let draft = fields.into_draft(photo_urls)?;
            let files = read_upload_files(&photos)?;
            let record =
                commands::records_create(&pool, &session, draft, files, storage.as_ref()).await?;
            println!("created record {}", record.id);
        }
        Cmd::Edit {
            id,
            fields,
            photos,
            photo_urls,
        } => {
            let session = authenticate(&pool, &cli.login, &cli.password).await?;
            let patch = fields.into_patch(photo_urls)?;
            let files = read_upload_files(&photos)?;
            commands::records_update(&pool, &session, id, patch, files, storage.as_ref()).await?;
            println!("updated record {id}");
        }
        Cmd::Show { id } => {
            authenticate(&pool, &cli.login, &cli.password).await?;
            match commands::records_get(&pool, id).await? {
                Some(record) => println!("{}", serde_json::to_string(&record)?),
                None => anyhow::bail!("no record with id {id}"),
            }
        }
        Cmd::Rm { id } => {
            let session = authenticate(&pool, &cli.login, &cli.password).await?;
            commands::records_delete(&pool, &session, id).await?;
            println!("deleted record {id}");
        }
        Cmd::Export { filters, out } => {
            authenticate(&pool, &cli.login, &cli.password).await?;
            let filter = filters.into_filter()?;
            let bytes = commands::records_export(&pool, &filter).await?;
            std::fs::write(&out, bytes)
                .with_context(|| format!("write export to {}", out.display()))?;
            println!("wrote {}", out.display());
        }
        Cmd::User { cmd } => {
            let session = authenticate(&pool, &cli.login, &cli.password).await?;
            match cmd {
                UserCmd::Add {
                    username,
                    password,
                    admin,
                    description,
                } => {
                    let user = NewUser {
                        username: username.clone(),
                        password,
                        role: if admin { Role::Admin } else { Role::Viewer },
                        description,
                    };
                    commands::users_add(&pool, &session, &user).await?;
                    println!("created user {username}");
                }
                UserCmd::Rm { username } => {
                    commands::users_remove(&pool, &session, &username).await?;
                    println!("deleted user {username}");
                }
                UserCmd::Ls => {
                    for user in commands::users_list(&pool, &session).await? {
                        println!("{}", serde_json::to_string(&user)?);
                    }
                }
            }
        }
    }

    Ok(())
}

async fn authenticate(
    pool: &PgPool,
    login: &Option<String>,
    password: &Option<String>,
) -> Result<Session> {
    let username = login
        .clone()
        .or_else(|| std::env::var("PDIREG_USER").ok())
        .context("no username; pass --login or set PDIREG_USER")?;
    let password = password
        .clone()
        .or_else(|| std::env::var("PDIREG_PASSWORD").ok())
        .context("no password; pass --password or set PDIREG_PASSWORD")?;
    Ok(commands::login(pool, &username, &password).await?)
}

fn read_upload_files(paths: &[PathBuf]) -> Result<Vec<UploadFile>> {
    paths
        .iter()
        .map(|path| {
            let bytes = std::fs::read(path)
                .with_context(|| format!("read photo {}", path.display()))?;
            Ok(UploadFile {
                name: file_name(path),
                content_type: mime_guess::from_path(path)
                    .first_or_octet_stream()
                    .essence_str()
                    .to_string(),
                bytes,
            })
        })
        .collect()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
