use clap::Parser;
use serde_json::json;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    user_id: String,

    #[arg(default_value_t = 300)]
    pulse_ms: i64,

    #[arg(long, default_value = "http://localhost:8080")]
    server: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/gate/open", args.server))
        .json(&json!({"userId": args.user_id, "pulseMs": args.pulse_ms}))
        .send()
        .await
        .unwrap();

    println!("{}", response.status());

    let body: serde_json::Value = response.json().await.unwrap();
    println!("{}", serde_json::to_string_pretty(&body).unwrap());
}
