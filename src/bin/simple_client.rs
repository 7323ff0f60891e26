// Minimal consumer: connects, attaches a stream, plays it, and logs every
// audio/video sample as it is pulled off the sink.

use rtmp_client::{
    NetConnection, NetStream, RtmpClientConfig, RtmpUri, SampleKind, SessionEvent, StreamEvent,
};

use rtmp_client::log::{LogConfig, Logger};
use rtmp_client::rtmp::build_connect_command;
use rtmp_client::utils::get_env_bool;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let _ = dotenvy::dotenv();

    let logger = Logger::new(LogConfig {
        prefix: "".to_string(),
        error_enabled: get_env_bool("LOG_ERROR", true),
        warning_enabled: get_env_bool("LOG_WARNING", true),
        info_enabled: get_env_bool("LOG_INFO", true),
        debug_enabled: get_env_bool("LOG_DEBUG", false),
        trace_enabled: get_env_bool("LOG_TRACE", get_env_bool("LOG_DEBUG", false)),
    });

    const VERSION: &str = env!("CARGO_PKG_VERSION");
    logger.log(&format!("RTMP client ({VERSION})"));

    let uri = match std::env::args().nth(1) {
        Some(arg) => arg,
        None => {
            logger.log("usage: simple_client <rtmp://host[:port]/app[/instance]>");
            std::process::exit(1);
        }
    };
    let uri = RtmpUri::parse(&uri)?;

    let config = match RtmpClientConfig::load_from_env(&logger) {
        Ok(c) => c,
        Err(e) => {
            logger.log(&format!("bad configuration: {e}"));
            std::process::exit(1);
        }
    };

    let connect_command = build_connect_command(1.0, &uri.app, &uri.tc_url(), "LNX 9,0,124,2");
    let (connection, mut session_events) = NetConnection::connect(
        &uri,
        connect_command,
        &config,
        logger.make_child_logger("[SESSION] "),
    )
    .await?;

    tokio::spawn(async move {
        while let Ok(event) = session_events.recv().await {
            if matches!(event, SessionEvent::Closed) {
                break;
            }
        }
    });

    let stream = NetStream::new(&connection);
    connection.attach(&stream).await?;

    let mut stream_events = stream.events();
    tokio::spawn(async move {
        while let Ok(event) = stream_events.recv().await {
            if let StreamEvent::StatusUpdated(status) = event {
                println!("stream status: {:?}", status);
            }
        }
    });

    let stream_name = uri.instance.clone().unwrap_or_else(|| uri.app.clone());
    stream.play_default(&stream_name).await?;

    let audio_stream = stream.clone();
    let audio_task = tokio::spawn(async move {
        loop {
            match audio_stream.request_sample(SampleKind::Audio).await {
                Ok(sample) => println!("audio sample: {:?}", sample),
                Err(_) => break,
            }
        }
    });

    let video_task = tokio::spawn(async move {
        loop {
            match stream.request_sample(SampleKind::Video).await {
                Ok(sample) => println!("video sample: {:?}", sample),
                Err(_) => break,
            }
        }
    });

    let _ = tokio::join!(audio_task, video_task);
    connection.close().await;

    Ok(())
}
