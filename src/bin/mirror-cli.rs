//! 镜像 CLI 客户端（测试版）
//!
//! 非交互式 CLI，用于测试和展示镜像功能
//! 启动后装配一个会话，灌入一段演示事件流，订阅转发并打印镜像内容

use anyhow::Result;
use clap::Parser;
use im_mirror_core::mirror::events::{
    ContactEvent, DisappearingMode, Event, GroupInfoEvent, LabelAssociationEvent, LabelEditEvent,
    MessageEvent, MessageInfo, ProtocolAction, ReceiptEvent, ReceiptKind,
};
use im_mirror_core::mirror::group::{GroupFetcher, GroupParticipant, GroupSnapshot};
use im_mirror_core::mirror::types::{content_kind, Page};
use im_mirror_core::{SessionConfig, SessionManager};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

/// 镜像 CLI 客户端
#[derive(Parser, Debug)]
#[command(name = "mirror-cli")]
#[command(about = "镜像 CLI 客户端 - 用于测试和展示本地镜像功能", long_about = None)]
struct Args {
    /// 会话名（默认: demo）
    #[arg(short, long, default_value = "demo")]
    session: String,

    /// 数据库文件路径，:memory: 表示内存库
    #[arg(long, default_value = ":memory:")]
    db: String,

    /// 本端 id（默认: 17764338283@s.whatsapp.net）
    #[arg(long, default_value = "17764338283@s.whatsapp.net")]
    own_id: String,

    /// 运行时长（秒），0 表示持续运行
    #[arg(short, long, default_value = "0")]
    duration: u64,

    /// 日志级别（默认: info,im_mirror_core=debug）
    #[arg(long, default_value = "info,im_mirror_core=debug")]
    log_level: String,
}

/// 初始化日志（同时输出到 stdout 和文件）
fn init_logger(log_level: &str) {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG（如果设置了），否则使用命令行参数
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    // 创建日志文件（追加模式）
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("debug.log")
        .expect("无法创建日志文件 debug.log");

    // 输出到 stdout（控制台），保留 ANSI 颜色代码用于终端显示
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    // 输出到文件，禁用 ANSI 颜色代码（文件不需要颜色）
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    info!("[CLI] 📝 日志已同时输出到控制台和文件: debug.log");
}

const DEMO_GROUP: &str = "123@g.us";
const DEMO_PEER: &str = "888@s.whatsapp.net";
const V1: &str = "1740132428878975";
const V2: &str = "1740132428878976";

/// 演示用的"上游"：固定返回一个已加入的群
struct DemoFetcher {
    own_id: String,
}

#[async_trait::async_trait]
impl GroupFetcher for DemoFetcher {
    async fn fetch_joined_groups(&self) -> Result<Vec<GroupSnapshot>> {
        Ok(vec![GroupSnapshot {
            id: DEMO_GROUP.to_string(),
            name: "产品讨论".to_string(),
            topic: "周会纪要在置顶".to_string(),
            participant_version_id: V1.to_string(),
            participants: vec![
                GroupParticipant::new(&self.own_id),
                GroupParticipant::new(DEMO_PEER),
            ],
            ..Default::default()
        }])
    }
}

fn incoming_message(id: &str, chat_id: &str, text: &str, timestamp: i64) -> Event {
    Event::Message(MessageEvent {
        info: MessageInfo {
            id: id.to_string(),
            chat_id: chat_id.to_string(),
            sender_id: DEMO_PEER.to_string(),
            from_me: false,
            timestamp,
        },
        content_kind: content_kind::TEXT,
        status: None,
        raw: text.as_bytes().to_vec(),
        context: None,
        protocol: None,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志
    init_logger(&args.log_level);

    info!("[CLI] 🚀 镜像 CLI 客户端（测试模式）");
    info!("[CLI] 📱 会话: {} / 本端: {}", args.session, args.own_id);
    info!("[CLI] ⏱️  运行时长: {} 秒（0=持续运行）", args.duration);

    let db_url = if args.db == ":memory:" {
        "sqlite::memory:".to_string()
    } else {
        format!("sqlite:{}?mode=rwc", args.db)
    };

    // 装配会话
    let manager = SessionManager::new();
    let session = manager
        .build(
            SessionConfig {
                name: args.session.clone(),
                db_url,
                own_id: args.own_id.clone(),
            },
            Arc::new(DemoFetcher {
                own_id: args.own_id.clone(),
            }),
        )
        .await
        .map_err(|e| anyhow::anyhow!("装配会话失败: {}", e))?;
    manager.start(&args.session).await?;
    info!("[CLI] ✅ 会话就绪！");

    // 启动时先整体拉一遍群列表，后续群信息事件走增量路径
    if let Err(e) = session.groups().list(None, Page::all()).await {
        error!("[CLI] ❌ 预拉群列表失败: {:?}", e);
    }

    // 订阅转发流并打印
    let sub = session.subscribe();
    let stream_task = tokio::spawn(async move {
        while let Some(envelope) = sub.recv().await {
            match envelope.tag.as_str() {
                "Message" => info!("[CLI/Stream] 📨 收到消息事件: {}", envelope.payload),
                "Receipt" => info!("[CLI/Stream] 📖 收到回执事件: {}", envelope.payload),
                "GroupInfo" => info!("[CLI/Stream] 🔄 群信息变更: {}", envelope.payload),
                "JoinedGroup" => info!("[CLI/Stream] 🆕 加入新群: {}", envelope.payload),
                "Contact" => info!("[CLI/Stream] 👥 联系人变更: {}", envelope.payload),
                "LabelEdit" => info!("[CLI/Stream] 📝 标签变更: {}", envelope.payload),
                "LabelAssociation" => info!("[CLI/Stream] 🔗 标签关联: {}", envelope.payload),
                "DeleteChat" => info!("[CLI/Stream] 🗑️ 会话删除: {}", envelope.payload),
                other => info!("[CLI/Stream] 📬 {} 事件: {}", other, envelope.payload),
            }
        }
        info!("[CLI/Stream] 订阅流结束");
    });

    // 灌入一段演示事件流
    info!("[CLI] 📥 开始灌入演示事件...");
    let now = chrono::Utc::now().timestamp();

    session.dispatch(Event::Contact(ContactEvent {
        id: DEMO_PEER.to_string(),
        full_name: Some("张三".to_string()),
        push_name: Some("小张".to_string()),
        ..Default::default()
    }));
    session.dispatch(incoming_message("DEMO-M1", DEMO_PEER, "在吗？", now - 60));
    let reply_id =
        session.record_sent_message(DEMO_PEER, content_kind::TEXT, "在的，怎么了".into());
    session.dispatch(Event::Receipt(ReceiptEvent {
        chat_id: DEMO_PEER.to_string(),
        message_ids: vec![reply_id.clone()],
        timestamp: now - 30,
        kind: ReceiptKind::Read,
    }));
    session.dispatch(incoming_message("DEMO-M2", DEMO_GROUP, "群里同步一下进度", now - 20));
    session.dispatch(Event::GroupInfo(GroupInfoEvent {
        group_id: DEMO_GROUP.to_string(),
        promote: vec![DEMO_PEER.to_string()],
        prev_participant_version_id: V1.to_string(),
        participant_version_id: V2.to_string(),
        ..Default::default()
    }));
    session.dispatch(Event::LabelEdit(LabelEditEvent {
        id: "1".to_string(),
        name: "工作".to_string(),
        color: 3,
        deleted: false,
    }));
    session.dispatch(Event::LabelAssociation(LabelAssociationEvent {
        chat_id: DEMO_PEER.to_string(),
        label_id: "1".to_string(),
        labeled: true,
    }));
    // 对端显式开启阅后即焚
    session.dispatch(Event::Message(MessageEvent {
        info: MessageInfo {
            id: "DEMO-M3".to_string(),
            chat_id: DEMO_PEER.to_string(),
            sender_id: DEMO_PEER.to_string(),
            from_me: false,
            timestamp: now - 10,
        },
        content_kind: content_kind::PROTOCOL,
        status: None,
        raw: vec![],
        context: None,
        protocol: Some(ProtocolAction::EphemeralSetting {
            expiration: 86400,
            disappearing_mode: Some(DisappearingMode {
                initiator: 0,
                trigger: 1,
                initiated_by_me: false,
            }),
        }),
    }));

    // 等后台落库
    sleep(Duration::from_millis(800)).await;

    // 展示镜像内容
    if let Ok(chats) = session.chats().list(None, Page::all()).await {
        info!("[CLI] 📋 会话列表（共 {} 个）:", chats.len());
        for chat in chats.iter().take(5) {
            info!(
                "[CLI]   - {} | {} | 最新消息时间: {}",
                chat.id,
                if chat.name.is_empty() { "(无名)" } else { &chat.name },
                chat.conversation_timestamp
            );
        }
    }

    match session.groups().list(None, Page::all()).await {
        Ok(groups) => {
            info!("[CLI] 👥 群列表（共 {} 个）", groups.len());
            for group in &groups {
                info!(
                    "[CLI]   - {} | {} | 成员 {} 人 | 版本 {}",
                    group.id,
                    group.name,
                    group.participants.len(),
                    group.participant_version_id
                );
            }
        }
        Err(e) => error!("[CLI] ❌ 读取群列表失败: {:?}", e),
    }

    if let Ok(contacts) = session.contacts().list(None, Page::all()).await {
        info!("[CLI] 📱 联系人（共 {} 个）", contacts.len());
        for contact in contacts.iter().take(5) {
            info!("[CLI]   - {} | {}", contact.id, contact.display_name());
        }
    }
    if let Ok(count) = session.messages().count().await {
        info!("[CLI] 📬 留存消息数: {}", count);
    }
    if let Ok(labels) = session.labels().list(Page::all()).await {
        info!("[CLI] 📝 标签（共 {} 个）", labels.len());
    }
    if let Ok(enabled) = session.ephemeral().list_enabled(Page::all()).await {
        info!("[CLI] ⏳ 开启阅后即焚的会话（共 {} 个）", enabled.len());
        for setting in &enabled {
            info!(
                "[CLI]   - {} 存活 {}s",
                setting.id,
                setting.setting.as_ref().map(|s| s.expiration).unwrap_or(0)
            );
        }
    }

    info!("[CLI] 💡 提示：订阅流会持续打印转发的事件");
    if args.duration > 0 {
        info!("[CLI] ⏰ {} 秒后自动退出", args.duration);
        sleep(Duration::from_secs(args.duration)).await;
        manager.stop(&args.session).await?;
        let _ = stream_task.await;
        info!("[CLI] 👋 程序退出");
    } else {
        info!("[CLI] ⏰ 持续运行中，按 Ctrl+C 退出");
        // 持续运行直到被中断
        loop {
            sleep(Duration::from_secs(3600)).await;
        }
    }

    Ok(())
}
