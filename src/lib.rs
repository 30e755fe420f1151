pub mod bootstrap;
pub mod cli;
pub mod codec;
pub mod connection;
pub mod error;
pub mod location;
pub mod models;
pub mod render;
pub mod store;

use bootstrap::{ HttpApiClient, SessionBootstrapper };
use cli::Args;
use connection::{ ChannelConfig, ChannelManager, IntentSender, WsTransport };
use location::{ FixedRouteProvider, LocationPublisher };
use log::info;
use models::chat::Role;
use render::{ project, ChatView, LogMapSurface, MapBinding };
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{ AsyncBufReadExt, BufReader };
use uuid::Uuid;

/// Interactive terminal session for one conversation: bootstrap, open the
/// channel, print the rendered transcript, forward composer lines.
pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    let role: Role = args.role.parse()?;
    let user_id = if args.user_id.is_empty() {
        Uuid::new_v4().to_string()
    } else {
        args.user_id.clone()
    };

    info!("--- Session Configuration ---");
    info!("API Base URL: {}", args.api_base_url);
    info!("Channel URL: {}", args.ws_base_url);
    info!("Website: {}", args.website_id);
    info!("Conversation: {}", args.conversation_id);
    info!("Role: {}", role);
    info!("User: {} ({})", args.user_name, user_id);
    info!("-----------------------------");

    let api = Arc::new(HttpApiClient::new(&args.api_base_url, &args.website_id));
    let bootstrapper = SessionBootstrapper::new(api.clone());
    // Terminal on failure: the operator re-runs the command to retry.
    let store = bootstrapper.bootstrap(&args.conversation_id, role).await?;

    let order_id = store.lock().await.conversation().order_id.clone();
    let manager = ChannelManager::open(
        ChannelConfig {
            ws_base_url: args.ws_base_url.clone(),
            conversation_id: args.conversation_id.clone(),
            role,
            user_id,
            settings: args.channel_settings(),
        },
        store.clone(),
        Arc::new(WsTransport),
        Some(api)
    )?;

    let mut publisher = if role == Role::Rider && args.demo_route {
        let route = FixedRouteProvider::new(
            vec![(5.4164, 100.3327), (5.4182, 100.3315), (5.42, 100.33)]
        );
        let mut publisher = LocationPublisher::new(
            Arc::new(route),
            manager.clone() as Arc<dyn IntentSender>,
            order_id
        ).with_intervals(
            Duration::from_secs(args.location_interval_secs),
            Duration::from_secs(args.location_timeout_secs)
        );
        publisher.start();
        Some(publisher)
    } else {
        None
    };

    // Render loop: poll the store and print whatever changed.
    let render_store = store.clone();
    let render_task = tokio::spawn(async move {
        let mut printed = 0usize;
        let mut last_banner: Option<&'static str> = None;
        let mut map = MapBinding::new(LogMapSurface);
        loop {
            let view = project(&render_store.lock().await.snapshot());
            print_transcript(&view, &mut printed, &mut last_banner);
            map.sync(&view);
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    });

    println!("Type a message and press enter. /quit to leave.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        manager.note_input().await;
        manager.send_text(line).await;
    }

    render_task.abort();
    if let Some(publisher) = publisher.as_mut() {
        publisher.stop();
    }
    manager.close().await;
    Ok(())
}

fn print_transcript(
    view: &ChatView,
    printed: &mut usize,
    last_banner: &mut Option<&'static str>
) {
    if view.banner != *last_banner {
        *last_banner = view.banner;
        if let Some(banner) = view.banner {
            println!("-- {} --", banner);
        }
    }
    for bubble in view.bubbles.iter().skip(*printed) {
        let marker = if bubble.mine { "you" } else { bubble.sender_name.as_str() };
        println!("[{}] {}", marker, describe_bubble(&bubble.kind));
    }
    *printed = view.bubbles.len();
    if !view.typing_roles.is_empty() {
        let roles: Vec<&str> = view.typing_roles
            .iter()
            .map(|r| r.as_str())
            .collect();
        println!("... {} typing", roles.join(", "));
    }
}

fn describe_bubble(kind: &render::BubbleKind) -> String {
    match kind {
        render::BubbleKind::Text { body } => body.clone(),
        render::BubbleKind::Image { url } =>
            format!("(image: {})", url.as_deref().unwrap_or("pending")),
        render::BubbleKind::Payment { status, amount } =>
            format!(
                "(payment proof, {} {})",
                amount.map(|a| a.to_string()).unwrap_or_else(|| "?".into()),
                status.as_deref().unwrap_or("unverified")
            ),
        render::BubbleKind::Location { latitude, longitude } =>
            format!("(location: {}, {})", latitude, longitude),
        render::BubbleKind::Status { body } => format!("* {} *", body),
        render::BubbleKind::Voice { url } =>
            format!("(voice note: {})", url.as_deref().unwrap_or("pending")),
    }
}
