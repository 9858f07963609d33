use std::{env, process};

use featureflag_rust_sdk::{user::User, Client, Config};

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() != 3 {
        eprintln!("Usage: defaults <sdk-key> <flag-key>");
        process::exit(1);
    }
    let sdk_key = &args[1];
    let flag_key = &args[2];

    let mut client = Client::new(Config::new(sdk_key));
    client.start().await.expect("failed to start");

    let user = User::new("demo-user");
    let value = client.bool_variation(flag_key, &user, false);
    dbg!(value);

    client.close();
}
