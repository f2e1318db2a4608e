#[macro_use] extern crate rocket;
#[macro_use] extern crate serde_derive;

use clap::{Command, Arg, ArgAction};
use log::info;
use rocket::{Request, Response};
use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::Header;

mod common;
mod config;
mod error;
mod geometry;
mod janitor;
mod launcher;
mod locations;
mod notifier;
mod rest_api;
mod store;
mod stream_state;
mod supervisor;
mod terminator;

use crate::config::AppConfig;



// The map UI is served from elsewhere, so browsers need CORS headers to talk to this server.
pub struct CORS;

#[rocket::async_trait]
impl Fairing for CORS {
	fn info(&self) -> Info {
		Info {
			name: "Add CORS headers to responses",
			kind: Kind::Response
		}
	}

	async fn on_response<'r>(&self, _request: &'r Request<'_>, response: &mut Response<'r>) {
		response.set_header(Header::new("Access-Control-Allow-Origin", "*"));
		response.set_header(Header::new("Access-Control-Allow-Methods", "POST, GET, PATCH, DELETE, OPTIONS"));
		response.set_header(Header::new("Access-Control-Allow-Headers", "*"));
		response.set_header(Header::new("Access-Control-Allow-Credentials", "true"));
	}
}


/// Stops every transcoder, removes all stream output and deletes every camera, then exits.
async fn clean_slate(app_config: &AppConfig) -> anyhow::Result<()> {
	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

	let services = rest_api::Services::from_config(app_config);
	let removed = services.supervisor.clean_slate().await?;
	info!("Removed {} camera(s); all streams stopped", removed);
	Ok(())
}

#[rocket::main]
async fn main() -> anyhow::Result<()> {
	let matches = Command::new("geocam-mgr")
		.version(env!("CARGO_PKG_VERSION"))
		.about("Keeps a map of RTSP cameras and runs one HLS transcoder per active camera.")
		.arg(
			Arg::new("config")
				.action(ArgAction::Append)	// Allow argument to be specified multiple times
				.short('c')
				.long("config")
				.help("TOML file with geocam-mgr config")
		)
		.subcommand(
			Command::new("clean-slate")
				.about("Stop all streams, remove their output and delete every camera")
		)
		.get_matches();

	let config_files: Vec<&str> = matches.get_many::<String>("config")
		.map(|filenames| filenames.map(|v| v.as_str()).collect())
		.unwrap_or_default();
	let figment = config::figment(&config_files);

	if matches.subcommand_matches("clean-slate").is_some() {
		let app_config = AppConfig::from_figment(&figment)?;
		return clean_slate(&app_config).await;
	}

	rocket::custom(figment)
		.attach(rest_api::stage())
		.attach(CORS)
		.launch()
		.await?;

	anyhow::Ok(())
}
