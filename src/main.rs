use hushbot::{BOT_NAME, Config, Data, Error, commands, handlers, logging};

use poise::serenity_prelude::{self as serenity, Http};
use serenity::GatewayIntents;
use std::sync::Arc;
use tracing::{error, info};

/// Main function to run the bot
async fn async_main() -> Result<(), Error> {
    let config = Config::from_env().await?;
    logging::init(&config.logging)?;

    let token = config.bot.token.clone();
    let guild_id = config.guild_id();
    let prefix = config.bot.prefix.clone();

    // Set up the bot's data
    let data = Data::connect(config, Arc::new(Http::new(&token)));
    let sweeper = data.spawn_guard_sweeper();

    let framework_data = data.clone();
    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![
                commands::silence(),
                commands::unsilence(),
                commands::silenced(),
            ],
            prefix_options: poise::PrefixFrameworkOptions {
                prefix: Some(prefix),
                ..Default::default()
            },
            pre_command: |ctx| Box::pin(logging::log_command_start(ctx)),
            post_command: |ctx| Box::pin(logging::log_command_end(ctx)),
            on_error: |error| {
                Box::pin(async move {
                    logging::log_command_error(&error);
                })
            },
            ..Default::default()
        })
        .setup(move |ctx, _ready, framework| {
            Box::pin(async move {
                logging::log_console(format!("Registering commands in guild {guild_id}"));
                poise::builtins::register_in_guild(ctx, &framework.options().commands, guild_id)
                    .await?;
                Ok(framework_data)
            })
        })
        .build();

    // Configure the Serenity client
    let intents = GatewayIntents::non_privileged() | GatewayIntents::MESSAGE_CONTENT;
    let mut client = serenity::ClientBuilder::new(&token, intents)
        .event_handler(handlers::Handler::new(Arc::clone(&data.controller)))
        .framework(framework)
        .await?;

    // Ctrl-C stops the shards; pending unsilences are cancelled below
    let shard_manager = Arc::clone(&client.shard_manager);
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {err}");
            return;
        }
        info!("Received ctrl-c, shutting down");
        shard_manager.shutdown_all().await;
    });

    info!("Starting {BOT_NAME}...");
    let result = client.start().await;

    data.shutdown().await;
    if let Err(err) = sweeper.await {
        error!("Guard sweeper ended abnormally: {err}");
    }

    result.map_err(Into::into)
}

fn main() {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: failed to start the runtime: {err}");
            std::process::exit(1);
        }
    };

    // Handle any errors that occurred during execution
    if let Err(err) = runtime.block_on(async_main()) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
