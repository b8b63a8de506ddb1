use clap::{Arg, ArgAction, Command};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use packsync::logging;
use packsync::service::SyncService;
use packsync::storage::DiskStorage;
use packsync::SyncClient;

fn cli() -> Command {
	Command::new("packsync")
		.version(env!("CARGO_PKG_VERSION"))
		.about("Configurable file synchronization service")
		.subcommand_required(true)
		.arg(
			Arg::new("store")
				.short('s')
				.long("store")
				.value_name("DIR")
				.global(true)
				.help("Blob store directory (configs, pack archives, logs)"),
		)
		.subcommand(
			Command::new("serve")
				.about("Run the sync server")
				.arg(Arg::new("uuid").long("config").value_name("UUID").help(
					"Configuration to activate (defaults to the only stored one)",
				))
				.arg(
					Arg::new("log-file")
						.long("log-file")
						.action(ArgAction::SetTrue)
						.help("Write daily-rotated logs under <store>/logs/"),
				),
		)
		.subcommand(
			Command::new("sync")
				.about("Pull from a server into a local directory")
				.arg(Arg::new("dir").required(true).value_name("DIR"))
				.arg(Arg::new("host").long("host").default_value("127.0.0.1"))
				.arg(
					Arg::new("port")
						.long("port")
						.value_parser(clap::value_parser!(u16))
						.default_value("6666"),
				),
		)
		.subcommand(
			Command::new("config")
				.about("Manage stored configurations")
				.subcommand_required(true)
				.subcommand(Command::new("list").about("List stored configuration uuids"))
				.subcommand(
					Command::new("show")
						.about("Print one configuration as JSON")
						.arg(Arg::new("uuid").required(true)),
				)
				.subcommand(
					Command::new("seed")
						.about("Create a default server configuration")
						.arg(Arg::new("name").required(true))
						.arg(Arg::new("version").required(true))
						.arg(Arg::new("sync-dir").required(true)),
				)
				.subcommand(
					Command::new("delete")
						.about("Delete a stored configuration")
						.arg(Arg::new("uuid").required(true)),
				),
		)
}

fn store_dir(matches: &clap::ArgMatches) -> PathBuf {
	matches
		.get_one::<String>("store")
		.map(PathBuf::from)
		.unwrap_or_else(|| PathBuf::from(".packsync"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
	let matches = cli().get_matches();
	let store = store_dir(&matches);

	match matches.subcommand() {
		Some(("serve", sub)) => {
			// Keep the appender guard alive for the process lifetime
			let _guard = if sub.get_flag("log-file") {
				Some(logging::init_file_tracing(&store, "info")?)
			} else {
				logging::init_tracing("info");
				None
			};
			serve(store, sub.get_one::<String>("uuid").cloned()).await
		}
		Some(("sync", sub)) => {
			logging::init_tracing("info");
			let dir = PathBuf::from(sub.get_one::<String>("dir").expect("required"));
			let host = sub.get_one::<String>("host").expect("defaulted").clone();
			let port = *sub.get_one::<u16>("port").expect("defaulted");
			sync(dir, &host, port).await
		}
		Some(("config", sub)) => {
			logging::init_tracing("warn");
			config_cmd(store, sub).await
		}
		_ => unreachable!("subcommand required"),
	}
}

async fn serve(store: PathBuf, uuid: Option<String>) -> Result<(), Box<dyn Error>> {
	let service = SyncService::new(Arc::new(DiskStorage::new(&store)));

	let uuid = match uuid {
		Some(uuid) => uuid,
		None => {
			let mut uuids = service.list_configs().await?;
			match uuids.len() {
				1 => uuids.remove(0),
				0 => return Err("no stored configuration; run `packsync config seed` first".into()),
				_ => return Err("several configurations stored; pass --config <uuid>".into()),
			}
		}
	};

	let config = service.load_config(&uuid).await?;
	service.start()?;
	let addr = service.start_server().await?;
	println!("serving '{}' v{} on {}", config.name, config.version, addr);

	tokio::signal::ctrl_c().await?;
	println!("shutting down");
	service.stop().await;
	Ok(())
}

async fn sync(dir: PathBuf, host: &str, port: u16) -> Result<(), Box<dyn Error>> {
	// Client-side artifacts (applied pack digests) live inside the target
	let storage = DiskStorage::new(dir.join(".packsync"));

	let mut client = SyncClient::connect(host, port).await?;
	let config = client.init().await?;
	println!("pulling '{}' v{} from {}:{}", config.name, config.version, host, port);

	let outcomes = client.sync_all(&dir, &storage).await?;
	for (folder, outcome) in outcomes {
		println!(
			"  {:16} {} transferred, {} deleted, {} unchanged, {} failed",
			if folder.is_empty() { "<root>" } else { &folder },
			outcome.transferred,
			outcome.deleted,
			outcome.skipped,
			outcome.failed
		);
	}
	Ok(())
}

async fn config_cmd(store: PathBuf, matches: &clap::ArgMatches) -> Result<(), Box<dyn Error>> {
	let service = SyncService::new(Arc::new(DiskStorage::new(&store)));

	match matches.subcommand() {
		Some(("list", _)) => {
			for uuid in service.list_configs().await? {
				println!("{}", uuid);
			}
		}
		Some(("show", sub)) => {
			let uuid = sub.get_one::<String>("uuid").expect("required");
			let config = service.load_config(uuid).await?;
			println!("{}", serde_json::to_string_pretty(config.as_ref())?);
		}
		Some(("seed", sub)) => {
			let name = sub.get_one::<String>("name").expect("required");
			let version = sub.get_one::<String>("version").expect("required");
			let sync_dir = PathBuf::from(sub.get_one::<String>("sync-dir").expect("required"));
			let config = service.seed_default_config(name, version, sync_dir).await?;
			println!("{}", config.uuid);
		}
		Some(("delete", sub)) => {
			let uuid = sub.get_one::<String>("uuid").expect("required");
			service.delete_config(uuid).await?;
		}
		_ => unreachable!("subcommand required"),
	}
	Ok(())
}

// vim: ts=4
