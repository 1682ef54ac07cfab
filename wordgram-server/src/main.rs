mod config;

use std::path::PathBuf;

use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{App, HttpResponse, HttpServer, Responder, get, web};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use wordgram_core::model::table::OrderStats;
use wordgram_core::{Candidate, Predictor, pipeline};

use config::{ServerConfig, ServerSettings};

/// Query parameters of `/v1/predict`.
#[derive(Deserialize)]
struct PredictParams {
	/// Already typed text; normalized the same way as the training corpus.
	text: Option<String>,
	limit: Option<usize>,
}

/// Body of a `/v1/predict` response.
///
/// `order` and `context` are `null` when no context matched.
#[derive(Serialize, Debug, PartialEq)]
struct PredictResponse<'a> {
	order: Option<usize>,
	context: Option<String>,
	candidates: &'a [Candidate],
}

#[derive(Serialize)]
struct ModelResponse {
	max_order: usize,
	orders: Vec<OrderStats>,
}

impl PredictParams {
	/// Resolves the requested number of candidates.
	fn limit(&self, config: &ServerConfig) -> Result<usize, String> {
		match self.limit {
			None => Ok(config.default_limit),
			Some(0) => Err("limit must be at least 1".into()),
			Some(n) if n > config.max_limit => Err(format!("limit must not exceed {}", config.max_limit)),
			Some(n) => Ok(n),
		}
	}
}

/// HTTP GET endpoint `/v1/predict`
///
/// Returns the ranked next-word candidates for `text`. An empty or unknown
/// history is not an error: it yields an empty candidate list.
#[get("/v1/predict")]
async fn get_prediction(
	predictor: web::Data<Predictor>,
	config: web::Data<ServerConfig>,
	query: web::Query<PredictParams>,
) -> impl Responder {
	let limit = match query.limit(&config) {
		Ok(limit) => limit,
		Err(e) => return HttpResponse::BadRequest().body(e),
	};

	let text = query.text.as_deref().unwrap_or_default();
	HttpResponse::Ok().json(predict_response(&predictor, text, limit))
}

fn predict_response<'a>(predictor: &'a Predictor, text: &str, limit: usize) -> PredictResponse<'a> {
	match predictor.lookup_text(text) {
		Some(found) => PredictResponse {
			order: Some(found.order),
			context: Some(found.context),
			candidates: &found.candidates[..limit.min(found.candidates.len())],
		},
		None => PredictResponse { order: None, context: None, candidates: &[] },
	}
}

/// HTTP GET endpoint `/v1/model`
///
/// Per-order statistics of the loaded table.
#[get("/v1/model")]
async fn get_model(predictor: web::Data<Predictor>) -> impl Responder {
	let table = predictor.table();
	HttpResponse::Ok().json(ModelResponse {
		max_order: table.max_order(),
		orders: table.stats(),
	})
}

/// Main entry point for the server.
///
/// Loads the probability table once, before binding, and shares it with
/// every worker through `web::Data`. The table is never mutated, so no lock
/// is taken on the request path.
///
/// The configuration file is the first argument, else `$WORDGRAM_CONFIG`,
/// else `./wordgram.toml`.
#[actix_web::main]
async fn main() -> anyhow::Result<()> {
	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

	let config_path = std::env::args_os().nth(1).map(PathBuf::from);
	let settings = ServerSettings::load(config_path.as_deref())?;

	let predictor = pipeline::load_predictor(&settings.model).with_context(|| {
		format!(
			"failed to load model {}",
			settings.model.paths.optimized_model.display()
		)
	})?;

	let predictor = web::Data::new(predictor);
	let server_config = web::Data::new(settings.server.clone());
	let allow_any_origin = settings.server.allow_any_origin;

	log::info!("listening on {}:{}", settings.server.host, settings.server.port);
	HttpServer::new(move || {
		let cors = if allow_any_origin { Cors::permissive() } else { Cors::default() };
		App::new()
			.wrap(Logger::default())
			.wrap(cors)
			.app_data(predictor.clone())
			.app_data(server_config.clone())
			.service(get_prediction)
			.service(get_model)
	})
	.bind((settings.server.host.as_str(), settings.server.port))?
	.run()
	.await?;

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use actix_web::test::{TestRequest, call_and_read_body_json, call_service, init_service};

	const TABLE: &str = r#"{
		"1": {"ez": 0.5, "im": 0.5},
		"2": {"im": {"mamoste": 1.0}},
		"3": {"ez im": {"xwendekar": 0.5, "kurd": 0.25, "li": 0.25}}
	}"#;

	fn predictor() -> Predictor {
		Predictor::new(serde_json::from_str(TABLE).unwrap())
	}

	#[test]
	fn test_limit_resolution() {
		let config = ServerConfig::default();
		let params = |limit| PredictParams { text: None, limit };
		assert_eq!(params(None).limit(&config), Ok(3));
		assert_eq!(params(Some(7)).limit(&config), Ok(7));
		assert!(params(Some(0)).limit(&config).is_err());
		assert!(params(Some(1000)).limit(&config).is_err());
	}

	#[test]
	fn test_predict_response() {
		let predictor = predictor();
		let response = predict_response(&predictor, "Ez im", 2);
		assert_eq!(response.order, Some(3));
		assert_eq!(response.context.as_deref(), Some("ez im"));
		assert_eq!(response.candidates.len(), 2);

		let empty = predict_response(&predictor, "zzz_unseen_token", 2);
		assert_eq!(empty, PredictResponse { order: None, context: None, candidates: &[] });
	}

	#[actix_web::test]
	async fn test_predict_endpoint() {
		let app = init_service(
			App::new()
				.app_data(web::Data::new(predictor()))
				.app_data(web::Data::new(ServerConfig::default()))
				.service(get_prediction),
		)
		.await;

		let req = TestRequest::get().uri("/v1/predict?text=ez%20im&limit=1").to_request();
		let body: serde_json::Value = call_and_read_body_json(&app, req).await;
		assert_eq!(body["order"], 3);
		assert_eq!(body["candidates"][0]["word"], "xwendekar");
		assert_eq!(body["candidates"].as_array().unwrap().len(), 1);

		let req = TestRequest::get().uri("/v1/predict").to_request();
		let body: serde_json::Value = call_and_read_body_json(&app, req).await;
		assert!(body["order"].is_null());
		assert!(body["candidates"].as_array().unwrap().is_empty());

		let req = TestRequest::get().uri("/v1/predict?text=ez&limit=0").to_request();
		let resp = call_service(&app, req).await;
		assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
	}

	#[actix_web::test]
	async fn test_model_endpoint() {
		let app = init_service(App::new().app_data(web::Data::new(predictor())).service(get_model)).await;

		let req = TestRequest::get().uri("/v1/model").to_request();
		let body: serde_json::Value = call_and_read_body_json(&app, req).await;
		assert_eq!(body["max_order"], 3);
		assert_eq!(body["orders"][2]["candidates"], 3);
	}
}
