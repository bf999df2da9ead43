use std::{env, path, sync::Arc};

use fazt::AppBuilder;
use fazt_store_adapter_sqlite::StoreAdapterSqlite;

pub struct Config {
	pub data_dir: path::PathBuf,
	pub listen: String,
}

#[tokio::main]
async fn main() {
	let config = Config {
		data_dir: path::PathBuf::from(env::var("FAZT_DATA_DIR").unwrap_or("./data".to_string())),
		listen: env::var("FAZT_LISTEN").unwrap_or("127.0.0.1:8080".to_string()),
	};

	if let Err(err) = std::fs::create_dir_all(&config.data_dir) {
		eprintln!("cannot create data dir {}: {}", config.data_dir.display(), err);
		std::process::exit(1);
	}

	let store = match StoreAdapterSqlite::new(&config.data_dir).await {
		Ok(store) => Arc::new(store),
		Err(err) => {
			eprintln!("cannot open store: {}", err);
			std::process::exit(1);
		}
	};

	let mut builder = AppBuilder::new();
	builder.listen(config.listen).store_adapter(store);
	if let Ok(base_domain) = env::var("FAZT_BASE_DOMAIN") {
		builder.base_domain(base_domain);
	}
	if env::var("FAZT_ALLOW_HTTP_EGRESS").is_ok() {
		builder.allow_http_egress(true);
	}

	if let Err(err) = builder.run().await {
		eprintln!("fazt exited with error: {}", err);
		std::process::exit(1);
	}
}

// vim: ts=4
