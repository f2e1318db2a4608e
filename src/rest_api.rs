use std::sync::Arc;

use rocket::{Build, Rocket, Shutdown, State};
use rocket::fairing::AdHoc;
use rocket::fs::FileServer;
use rocket::http::Status;
use rocket::request::{self, FromRequest, Request};
use rocket::response::{self, Responder};
use rocket::response::status::Custom;
use rocket::response::stream::{Event, EventStream};
use rocket::serde::json::{json, Json, Value};
use rocket::tokio::select;
use rocket::tokio::sync::broadcast::error::RecvError;

use log::{info, warn, error};

use crate::common::{Camera, CameraId, CameraList, CameraUpdate, NewCamera, UserId, CAMERA_GROUP};
use crate::config::{AppConfig, StreamingConfig};
use crate::error::{StoreError, SupervisorError, ValidationError};
use crate::geometry::FeatureCollection;
use crate::launcher::FfmpegLauncher;
use crate::locations::{LocationId, LocationStore, MapLocation, SaveError, SaveGeometry};
use crate::notifier::BroadcastNotifier;
use crate::store::{CameraStore, FileCameraStore};
use crate::supervisor::{StreamStatus, Supervisor};
use crate::terminator::SystemTerminator;



/// Carries the id of the user a request acts for. Authentication happens in front of this service.
pub const USER_HEADER: &str = "X-User-Id";

pub struct CurrentUser(pub UserId);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for CurrentUser {
	type Error = &'static str;

	async fn from_request(request: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
		match request.headers().get_one(USER_HEADER).map(str::parse::<UserId>) {
			Some(Ok(id)) => request::Outcome::Success(CurrentUser(id)),
			Some(Err(_)) => request::Outcome::Error((Status::Unauthorized, "malformed user id")),
			None => request::Outcome::Error((Status::Unauthorized, "missing user id")),
		}
	}
}

#[derive(Debug)]
pub struct ApiError {
	status: Status,
	reason: String,
}

impl From<SupervisorError> for ApiError {
	fn from(err: SupervisorError) -> Self {
		let status = match &err {
			SupervisorError::NotFound(_) => Status::NotFound,
			SupervisorError::Invalid(_) => Status::BadRequest,
			SupervisorError::Conflict(..) => Status::Conflict,
			SupervisorError::Store(StoreError::DuplicateSource(_)) => Status::Conflict,
			SupervisorError::Store(_) => Status::InternalServerError,
		};
		if status == Status::InternalServerError {
			error!("Camera request failed: {}", err);
		}
		ApiError { status, reason: err.to_string() }
	}
}

impl From<ValidationError> for ApiError {
	fn from(err: ValidationError) -> Self {
		ApiError { status: Status::BadRequest, reason: err.to_string() }
	}
}

impl From<SaveError> for ApiError {
	fn from(err: SaveError) -> Self {
		match err {
			SaveError::Invalid(err) => err.into(),
			SaveError::Store(err) => {
				error!("Failed to save location: {}", err);
				ApiError { status: Status::InternalServerError, reason: err.to_string() }
			}
		}
	}
}

impl<'r> Responder<'r, 'static> for ApiError {
	fn respond_to(self, request: &'r Request<'_>) -> response::Result<'static> {
		Custom(self.status, error_body(&self.reason)).respond_to(request)
	}
}

fn error_body(reason: &str) -> Value {
	json!({
		"status": "error",
		"reason": reason,
	})
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug)]
#[derive(Deserialize)]
pub struct Selection<Id> {
	#[serde(default)]
	pub ids: Vec<Id>,
}



#[get("/?<active>")]
async fn list_cameras(user: CurrentUser, active: Option<bool>, supervisor: &State<Arc<Supervisor>>) -> ApiResult<CameraList> {
	Ok(Json(supervisor.list(user.0, active).await?))
}

#[get("/<id>")]
async fn get_camera(user: CurrentUser, id: CameraId, supervisor: &State<Arc<Supervisor>>) -> ApiResult<Camera> {
	Ok(Json(supervisor.get(user.0, id).await?))
}

#[post("/", data="<camera_json>")]
async fn new_camera(user: CurrentUser, camera_json: Json<NewCamera>, supervisor: &State<Arc<Supervisor>>) -> ApiResult<Camera> {
	Ok(Json(supervisor.create(user.0, camera_json.into_inner()).await?))
}

#[patch("/<id>", data="<update_json>")]
async fn update_camera(user: CurrentUser, id: CameraId, update_json: Json<CameraUpdate>, supervisor: &State<Arc<Supervisor>>) -> ApiResult<Camera> {
	Ok(Json(supervisor.update(user.0, id, update_json.into_inner()).await?))
}

#[delete("/<id>")]
async fn delete_camera(user: CurrentUser, id: CameraId, supervisor: &State<Arc<Supervisor>>) -> ApiResult<Camera> {
	Ok(Json(supervisor.delete(user.0, id).await?))
}

#[post("/<id>/start")]
async fn start_camera(user: CurrentUser, id: CameraId, supervisor: &State<Arc<Supervisor>>) -> ApiResult<Camera> {
	Ok(Json(supervisor.start(user.0, id).await?))
}

#[post("/<id>/stop")]
async fn stop_camera(user: CurrentUser, id: CameraId, supervisor: &State<Arc<Supervisor>>) -> ApiResult<Camera> {
	Ok(Json(supervisor.stop(user.0, id).await?))
}

#[get("/<id>/status")]
async fn camera_status(user: CurrentUser, id: CameraId, supervisor: &State<Arc<Supervisor>>) -> ApiResult<StreamStatus> {
	Ok(Json(supervisor.status(user.0, id).await?))
}

#[get("/geojson")]
async fn cameras_geojson(user: CurrentUser, supervisor: &State<Arc<Supervisor>>) -> ApiResult<FeatureCollection> {
	Ok(Json(supervisor.cameras_geojson(user.0, None).await?))
}

#[post("/geojson", data="<selection>")]
async fn selected_cameras_geojson(user: CurrentUser, selection: Json<Selection<CameraId>>, supervisor: &State<Arc<Supervisor>>) -> ApiResult<FeatureCollection> {
	Ok(Json(supervisor.cameras_geojson(user.0, Some(selection.ids.as_slice())).await?))
}



#[get("/")]
async fn list_locations(user: CurrentUser, locations: &State<Arc<LocationStore>>) -> Json<Vec<MapLocation>> {
	Json(locations.list(user.0).await)
}

#[post("/", data="<request>")]
async fn save_geometry(user: CurrentUser, request: Json<SaveGeometry>, locations: &State<Arc<LocationStore>>) -> Result<Value, ApiError> {
	let saved = locations.save_geometry(user.0, request.into_inner()).await?;
	Ok(json!({
		"status": "success",
		"locations": saved,
	}))
}

#[post("/geojson", data="<selection>")]
async fn locations_geojson(user: CurrentUser, selection: Json<Selection<LocationId>>, locations: &State<Arc<LocationStore>>) -> ApiResult<FeatureCollection> {
	Ok(Json(locations.geojson(user.0, &selection.ids).await?))
}



/// Server-sent events for the caller's cameras. Nothing is replayed for late subscribers.
#[get("/events")]
fn camera_events(user: CurrentUser, notifier: &State<Arc<BroadcastNotifier>>, mut shutdown: Shutdown) -> EventStream![] {
	let mut receiver = notifier.subscribe(CAMERA_GROUP);
	let owner = user.0;

	EventStream! {
		loop {
			let event = select! {
				message = receiver.recv() => match message {
					Ok(event) => event,
					Err(RecvError::Closed) => break,
					Err(RecvError::Lagged(skipped)) => {
						warn!("Event subscriber of user {} fell behind and missed {} event(s)", owner, skipped);
						continue;
					}
				},
				_ = &mut shutdown => break,
			};

			if event.camera.owner == owner {
				yield Event::json(&event);
			}
		}
	}
}



#[catch(400)]
fn bad_request() -> Value {
	error_body("Malformed request.")
}

#[catch(401)]
fn unauthorized() -> Value {
	error_body("Missing or malformed X-User-Id header.")
}

#[catch(404)]
fn not_found() -> Value {
	error_body("Resource was not found.")
}

#[catch(422)]
fn unprocessable() -> Value {
	error_body("Request body could not be processed.")
}

#[catch(500)]
fn internal_error() -> Value {
	error_body("An internal server error occurred.")
}



/// Everything the routes need, shared through Rocket's managed state.
pub struct Services {
	pub supervisor: Arc<Supervisor>,
	pub notifier: Arc<BroadcastNotifier>,
	pub locations: Arc<LocationStore>,
}

impl Services {
	pub fn from_config(config: &AppConfig) -> Self {
		let store: Arc<dyn CameraStore> = match &config.storage.cameras_file {
			Some(path) => Arc::new(FileCameraStore::open(path)),
			None => {
				warn!("storage.cameras_file is not set; cameras will not survive a restart");
				Arc::new(FileCameraStore::in_memory())
			}
		};
		let locations = match &config.storage.locations_file {
			Some(path) => LocationStore::open(path),
			None => LocationStore::in_memory(),
		};
		let notifier = Arc::new(BroadcastNotifier::new());
		let supervisor = Supervisor::new(
			config.streaming.clone(),
			store,
			Arc::new(FfmpegLauncher::new(config.streaming.clone())),
			Arc::new(SystemTerminator),
			notifier.clone(),
		);

		Services {
			supervisor: Arc::new(supervisor),
			notifier,
			locations: Arc::new(locations),
		}
	}
}

pub fn mount(rocket: Rocket<Build>, services: Services) -> Rocket<Build> {
	rocket
		.manage(services.supervisor)
		.manage(services.notifier)
		.manage(services.locations)
		.register("/", catchers![bad_request, unauthorized, not_found, unprocessable, internal_error])
		.mount("/v0/cameras", routes![
			list_cameras, get_camera, new_camera, update_camera, delete_camera,
			start_camera, stop_camera, camera_status, cameras_geojson, selected_cameras_geojson,
		])
		.mount("/v0/locations", routes![list_locations, save_geometry, locations_geojson])
		.mount("/v0", routes![camera_events])
}

/// Serves the transcoder output so the public stream addresses resolve.
async fn serve_stream_output(rocket: Rocket<Build>, config: &StreamingConfig) -> Rocket<Build> {
	let Some(output_dir) = &config.output_dir else {
		error!("streaming.output_dir is not set; camera streams cannot be started");
		return rocket;
	};
	let Some(mount_point) = config.hls_mount_point() else {
		info!("Stream output is served externally at {}", config.media_url);
		return rocket;
	};
	if let Err(err) = tokio::fs::create_dir_all(output_dir).await {
		error!("Failed to create stream output directory {}: {}", output_dir.display(), err);
		return rocket;
	}

	info!("Serving stream output from {} at {}", output_dir.display(), mount_point);
	rocket.mount(mount_point.as_str(), FileServer::from(output_dir))
}

pub fn stage() -> AdHoc {
	AdHoc::try_on_ignite("Camera supervisor", |rocket| async {
		let config = match AppConfig::from_figment(rocket.figment()) {
			Ok(config) => config,
			Err(err) => {
				error!("Invalid configuration: {}", err);
				return Err(rocket);
			}
		};

		let rocket = serve_stream_output(rocket, &config.streaming).await;
		Ok(mount(rocket, Services::from_config(&config)))
	})
}
