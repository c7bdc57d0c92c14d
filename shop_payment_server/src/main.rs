use dotenvy::dotenv;
use log::info;
use shop_payment_server::{
    cli::{display_help, parse_command_line_args, verify_audit_chains, Command},
    config::ServerConfig,
    server::run_server,
};

#[actix_web::main]
async fn main() {
    dotenv().ok();
    env_logger::init();
    let args = std::env::args().skip(1).collect::<Vec<String>>();
    let command = parse_command_line_args(&args);
    if command == Command::Help {
        display_help();
        return;
    }
    let config = ServerConfig::from_env_or_default();
    match command {
        Command::VerifyAudit(chains) => match verify_audit_chains(&config, &chains).await {
            Ok(true) => {},
            Ok(false) => std::process::exit(1),
            Err(e) => {
                eprintln!("{e}");
                std::process::exit(2);
            },
        },
        _ => {
            info!("🚀️ Shop payment server starting");
            match run_server(config).await {
                Ok(_) => println!("Bye!"),
                Err(e) => eprintln!("{e}"),
            }
        },
    }
}
