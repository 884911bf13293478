// ws_connection_core/src/manager.rs

//! 连接管理器：连接核心对外的唯一入口。
//!
//! `ConnectionManager` 持有一条 (至多一条) 活动链路，驱动状态机、心跳监视器、
//! 重连调度器与消息分发器协同工作：
//!
//! - 所有状态转换都在同一把 `parking_lot::Mutex<Core>` 下完成，因而严格串行；
//!   锁从不跨越 `.await`，也不会在调用消息处理器时持有。
//! - 链路、心跳定时器、重连定时器、连接超时定时器都运行在独立的 tokio 任务中，
//!   只持有指向共享状态的 `Weak` 引用，并带着创建时的链路代号。
//!   代号已被取代的信号与定时器一律忽略，旧链路不会"复活"。
//! - 链路信号由单一的泵任务按到达顺序处理，入站消息的广播与分发都在锁外进行。
//!
//! 可恢复的错误 (传输中断、连接 / 发送超时、心跳超时) 只会表现为
//! Connected/Connecting -> Reconnecting；认证被拒与重连耗尽进入终止状态 Failed，
//! 需要调用方显式 `connect` 才能恢复。

use std::sync::{Arc, Weak};

use common_models::ws_payloads::{AUTH_MESSAGE_TYPE, AuthResultPayload, CHAT_MESSAGE_TYPE};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::client::{
    ConnectRequest, Connector, Endpoint, LinkSignal, LinkSignalKind, TransportHandle,
    TungsteniteConnector,
};
use crate::collaborators::{CredentialProvider, NotificationCollaborator, PersistenceCollaborator};
use crate::config::ConnectionConfig;
use crate::dispatcher::{DispatchOutcome, MessageDispatcher, MessageHandler};
use crate::error::WsError;
use crate::event::ConnectionEvent;
use crate::handlers::install_default_handlers;
use crate::heartbeat::{HeartbeatMonitor, HeartbeatWindow};
use crate::message::{Envelope, MessageCodec};
use crate::outbound::PendingQueue;
use crate::reconnect::{NetworkQuality, ReconnectAttempt, ReconnectPolicy, ReconnectScheduler};
use crate::state_machine::{ConnectionState, ConnectionStateMachine, StateEvent, next_state};

/// 主动断开时使用的关闭码。
const NORMAL_CLOSE_CODE: u16 = 1000;

/// 当前会话的连接参数，`connect` 时设置，`disconnect` 或进入 Failed 时清除。
struct Session {
    endpoint: Endpoint,
    auth_token: Option<String>,
}

/// 进入 Failed 的原因，供 `wait_connected` 返回。
#[derive(Debug, Clone)]
enum TerminalReason {
    AuthRejected(String),
    Exhausted(u32),
}

impl TerminalReason {
    fn to_error(&self) -> WsError {
        match self {
            TerminalReason::AuthRejected(reason) => WsError::AuthRejected(reason.clone()),
            TerminalReason::Exhausted(attempts) => WsError::ReconnectExhausted(*attempts),
        }
    }
}

/// 受核心锁保护的全部可变状态。
struct Core {
    machine: ConnectionStateMachine,
    session: Option<Session>,
    /// 每打开或丢弃一条链路加一。
    generation: u64,
    link: Option<TransportHandle>,
    /// 当前链路是否已完成握手、可以写帧。
    link_open: bool,
    pending: PendingQueue,
    heartbeat: HeartbeatMonitor,
    scheduler: ReconnectScheduler,
    attempt: ReconnectAttempt,
    open_deadline: Option<JoinHandle<()>>,
    terminal: Option<TerminalReason>,
}

struct Shared {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    dispatcher: MessageDispatcher,
    core: Mutex<Core>,
    state_tx: broadcast::Sender<ConnectionState>,
    message_tx: broadcast::Sender<Envelope>,
    event_tx: broadcast::Sender<ConnectionEvent>,
    signal_tx: mpsc::UnboundedSender<LinkSignal>,
    /// 创建管理器时所在的运行时，`connect` 可以在运行时之外的线程调用。
    runtime: Handle,
    this: Weak<Shared>,
}

/// `ConnectionManager` 的构造器。
pub struct ConnectionManagerBuilder {
    config: ConnectionConfig,
    connector: Option<Arc<dyn Connector>>,
    network: Option<Arc<dyn NetworkQuality>>,
}

impl Default for ConnectionManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManagerBuilder {
    pub fn new() -> Self {
        Self {
            config: ConnectionConfig::default(),
            connector: None,
            network: None,
        }
    }

    /// 设置连接配置，未设置时使用 `ConnectionConfig::default()`。
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// 替换链路实现，未设置时使用 `TungsteniteConnector`。
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// 设置网络质量协作者，其系数会乘在每次重连的等待时间上。
    pub fn network_quality(mut self, network: Arc<dyn NetworkQuality>) -> Self {
        self.network = Some(network);
        self
    }

    /// 校验配置并创建管理器。
    ///
    /// # Returns
    ///
    /// * `Err(WsError::InvalidConfig)` - 配置不合法。
    /// * `Err(WsError::RuntimeUnavailable)` - 当前线程不在 tokio 运行时中。
    pub fn build(self) -> Result<ConnectionManager, WsError> {
        self.config.validate()?;
        let runtime = Handle::try_current().map_err(|e| {
            error!("[连接管理器] 无法创建连接管理器: 不在 tokio 运行时中");
            WsError::RuntimeUnavailable(e.to_string())
        })?;
        let config = self.config;
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(TungsteniteConnector::new()));
        let capacity = config.channel_capacity;
        let (state_tx, _) = broadcast::channel(capacity);
        let (message_tx, _) = broadcast::channel(capacity);
        let (event_tx, _) = broadcast::channel(capacity);
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();

        let scheduler = ReconnectScheduler::new(ReconnectPolicy::from_config(&config), self.network);
        let core = Core {
            machine: ConnectionStateMachine::new(),
            session: None,
            generation: 0,
            link: None,
            link_open: false,
            pending: PendingQueue::new(),
            heartbeat: HeartbeatMonitor::new(config.heartbeat_interval(), config.liveness_deadline()),
            attempt: scheduler.initial_attempt(),
            scheduler,
            open_deadline: None,
            terminal: None,
        };

        let shared = Arc::new_cyclic(|this| Shared {
            config,
            connector,
            dispatcher: MessageDispatcher::new(),
            core: Mutex::new(core),
            state_tx,
            message_tx,
            event_tx,
            signal_tx,
            runtime,
            this: this.clone(),
        });
        let pump = tokio::spawn(pump_signals(Arc::downgrade(&shared), signal_rx));
        info!("[连接管理器] 连接管理器已创建");
        Ok(ConnectionManager { shared, pump })
    }
}

/// 持久连接的管理器。
///
/// 丢弃管理器会停止所有定时器并以关闭码 1000 关闭当前链路。
pub struct ConnectionManager {
    shared: Arc<Shared>,
    pump: JoinHandle<()>,
}

impl ConnectionManager {
    /// 使用给定配置与默认的 `TungsteniteConnector` 创建管理器。
    pub fn new(config: ConnectionConfig) -> Result<Self, WsError> {
        ConnectionManagerBuilder::new().config(config).build()
    }

    /// 返回一个构造器，可替换链路实现或接入网络质量协作者。
    pub fn builder() -> ConnectionManagerBuilder {
        ConnectionManagerBuilder::new()
    }

    /// 发起连接。端点在此同步校验，网络过程在后台进行。
    ///
    /// 已处于 Connecting / Connected 时不做任何事；处于 Failed 时先复位。
    /// 处于 Reconnecting 时立即发起新的尝试，不再等待剩余的退避时间。
    ///
    /// # Arguments
    ///
    /// * `url` - 服务端地址，只接受 `ws://` 与 `wss://`。
    /// * `auth_token` - 认证令牌。提供时作为新链路的第一帧发送，并附在握手请求头中。
    ///
    /// # Returns
    ///
    /// * `Err(WsError::InvalidEndpoint)` - 地址无法解析或协议不受支持，状态不变。
    pub fn connect(&self, url: &str, auth_token: Option<&str>) -> Result<(), WsError> {
        self.shared.connect(url, auth_token)
    }

    /// 使用凭据协作者提供的地址与令牌发起连接。
    ///
    /// # Returns
    ///
    /// * `Err(WsError::MissingCredential)` - 协作者没有提供令牌。
    /// * 其余同 `connect`。
    pub fn connect_with_credentials(&self, credentials: &dyn CredentialProvider) -> Result<(), WsError> {
        let token = credentials.auth_token().ok_or(WsError::MissingCredential)?;
        self.shared.connect(&credentials.server_url(), Some(&token))
    }

    /// 主动断开：停止全部定时器，以关闭码 1000 关闭链路，丢弃待发送队列。
    pub fn disconnect(&self) {
        self.shared.disconnect();
    }

    /// 已连接时立即写出并返回 `true`；否则放入待发送队列并返回 `false`，
    /// 下次进入 Connected 时按提交顺序补发。
    pub fn send(&self, envelope: Envelope) -> bool {
        self.shared.send(envelope)
    }

    /// 等待连接结果：Connected 时返回 `Ok`；进入 Failed 时返回其原因；
    /// 连接被主动断开 (或从未发起) 时返回 `WsError::NotConnected`。
    pub async fn wait_connected(&self) -> Result<(), WsError> {
        let mut states = self.shared.state_tx.subscribe();
        if let Some(result) = self.shared.settled_result(self.state()) {
            return result;
        }
        loop {
            match states.recv().await {
                Ok(state) => {
                    if let Some(result) = self.shared.settled_result(state) {
                        return result;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!("[连接管理器] 状态订阅落后了 {} 条，改读当前状态", skipped);
                    if let Some(result) = self.shared.settled_result(self.state()) {
                        return result;
                    }
                }
                Err(RecvError::Closed) => return Err(WsError::NotConnected),
            }
        }
    }

    /// 订阅状态变化。每个订阅者都会收到此后的全部状态，互不争抢。
    ///
    /// 订阅前已经发生的状态不会补发，当前状态请用 `state()` 读取。
    pub fn subscribe_state(&self) -> broadcast::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// 订阅全部成功解码的入站信封 (包括控制消息)。
    pub fn subscribe_messages(&self) -> broadcast::Receiver<Envelope> {
        self.shared.message_tx.subscribe()
    }

    /// 订阅诊断事件，包括状态转换、重连安排、解码失败、处理器失败等。
    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.event_tx.subscribe()
    }

    /// 为某个消息类型注册处理器，同类型只保留最后一次注册。
    ///
    /// # Arguments
    ///
    /// * `message_type` - 信封的 `type` 字段。
    /// * `handler` - 处理器。它在锁外被调用，可以回调管理器。
    ///
    /// # Returns
    ///
    /// * 被替换掉的旧处理器 (如果有)。
    pub fn register_handler(
        &self,
        message_type: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> Option<Arc<dyn MessageHandler>> {
        self.shared.dispatcher.register(message_type, handler)
    }

    /// 移除某个消息类型的处理器并返回它。之后该类型的消息会产生 `UnhandledMessageType` 事件。
    pub fn unregister_handler(&self, message_type: &str) -> Option<Arc<dyn MessageHandler>> {
        self.shared.dispatcher.unregister(message_type)
    }

    /// 注册 chat / 回执 / typing / status 的默认处理器。
    pub fn install_default_handlers(
        &self,
        persistence: Arc<dyn PersistenceCollaborator>,
        notifications: Arc<dyn NotificationCollaborator>,
    ) {
        install_default_handlers(&self.shared.dispatcher, persistence, notifications);
    }

    /// 入站消息分发器。
    pub fn dispatcher(&self) -> &MessageDispatcher {
        &self.shared.dispatcher
    }

    /// 当前连接状态。
    pub fn state(&self) -> ConnectionState {
        self.shared.core.lock().machine.state()
    }

    /// 待发送队列中等待下次连接补发的消息数。
    pub fn pending_len(&self) -> usize {
        self.shared.core.lock().pending.len()
    }

    /// 当前的重连进度：本轮已发起的次数与下一次的等待时间。
    pub fn reconnect_attempt(&self) -> ReconnectAttempt {
        self.shared.core.lock().attempt
    }

    /// 心跳存活窗口的快照。
    pub fn heartbeat_window(&self) -> HeartbeatWindow {
        self.shared.core.lock().heartbeat.window()
    }

    /// 创建时使用的配置。
    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        {
            let mut guard = self.shared.core.lock();
            let core = &mut *guard;
            Shared::stop_timers(core);
            if let Some(link) = core.link.take() {
                link.close(NORMAL_CLOSE_CODE, "客户端已释放");
            }
        }
        self.pump.abort();
        debug!("[连接管理器] 连接管理器已释放");
    }
}

/// 按到达顺序处理链路信号。共享状态被释放后自行退出。
async fn pump_signals(shared: Weak<Shared>, mut signals: mpsc::UnboundedReceiver<LinkSignal>) {
    while let Some(signal) = signals.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.handle_signal(signal);
    }
}

impl Shared {
    fn connect(&self, url: &str, auth_token: Option<&str>) -> Result<(), WsError> {
        let endpoint = Endpoint::parse(url).inspect_err(|e| {
            warn!("[连接管理器] 拒绝连接请求: {}", e);
        })?;

        let _runtime = self.runtime.enter();
        let mut guard = self.core.lock();
        let core = &mut *guard;
        match core.machine.state() {
            ConnectionState::Connecting | ConnectionState::Connected => {
                debug!("[连接管理器] 已在连接中 ({})，忽略重复的 connect", core.machine.state());
                return Ok(());
            }
            ConnectionState::Failed => {
                self.apply(core, StateEvent::Reset);
            }
            ConnectionState::Closing => {
                self.apply(core, StateEvent::CloseCompleted);
            }
            ConnectionState::Disconnected | ConnectionState::Reconnecting => {}
        }

        info!("[连接管理器] 开始连接 {}", endpoint);
        core.terminal = None;
        core.session = Some(Session {
            endpoint,
            auth_token: auth_token.map(str::to_string),
        });
        core.scheduler.cancel();
        core.attempt = core.scheduler.initial_attempt();
        if self.apply(core, StateEvent::ConnectRequested) {
            Self::drop_link(core);
            self.open_link(core);
        }
        Ok(())
    }

    fn disconnect(&self) {
        let mut guard = self.core.lock();
        let core = &mut *guard;
        info!("[连接管理器] 主动断开连接 (当前状态 {})", core.machine.state());
        Self::stop_timers(core);
        Self::close_link(core, NORMAL_CLOSE_CODE, "客户端主动断开");
        self.discard_pending(core);
        core.session = None;
        match core.machine.state() {
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Reconnecting => {
                self.apply(core, StateEvent::CloseRequested);
                self.apply(core, StateEvent::CloseCompleted);
            }
            other => debug!("[连接管理器] 状态 {} 下无需关闭流程", other),
        }
    }

    fn send(&self, envelope: Envelope) -> bool {
        let mut guard = self.core.lock();
        let core = &mut *guard;
        if core.machine.state() == ConnectionState::Connected && Self::write_envelope(core, &envelope) {
            return true;
        }
        let seq = core.pending.push(envelope);
        debug!(
            "[连接管理器] 当前未连接 ({})，消息已排队 (序号 {}，队列长度 {})",
            core.machine.state(),
            seq,
            core.pending.len()
        );
        false
    }

    /// Connected / Failed / Disconnected 是 `wait_connected` 的结束条件。
    fn settled_result(&self, state: ConnectionState) -> Option<Result<(), WsError>> {
        match state {
            ConnectionState::Connected => Some(Ok(())),
            ConnectionState::Failed => {
                let terminal = self.core.lock().terminal.clone();
                Some(Err(terminal
                    .map(|t| t.to_error())
                    .unwrap_or(WsError::NotConnected)))
            }
            ConnectionState::Disconnected => Some(Err(WsError::NotConnected)),
            _ => None,
        }
    }

    // --- 状态转换 ---

    /// 校验并应用一次转换。离开某个状态前先取消只属于该状态的定时器。
    fn apply(&self, core: &mut Core, event: StateEvent) -> bool {
        let from = core.machine.state();
        let Some(to) = next_state(from, event) else {
            warn!("[连接管理器] 时序异常: 状态 {} 不接受事件 {}，已忽略", from, event);
            self.emit(ConnectionEvent::TransitionRejected { state: from, event });
            return false;
        };
        if from == ConnectionState::Connected {
            core.heartbeat.stop();
        }
        if from == ConnectionState::Reconnecting {
            core.scheduler.cancel();
        }
        if from == ConnectionState::Connecting {
            if let Some(deadline) = core.open_deadline.take() {
                deadline.abort();
            }
        }
        core.machine.transition(event);
        info!("[连接管理器] 状态转换: {} -> {} ({})", from, to, event);
        let _ = self.state_tx.send(to);
        self.emit(ConnectionEvent::StateChanged { from, to });
        true
    }

    fn emit(&self, event: ConnectionEvent) {
        debug!("[连接管理器] 事件: {:?}", event);
        let _ = self.event_tx.send(event);
    }

    // --- 链路 ---

    fn open_link(&self, core: &mut Core) {
        let Some(session) = core.session.as_ref() else {
            warn!("[连接管理器] 没有会话参数，无法打开链路");
            return;
        };
        core.generation += 1;
        core.link_open = false;
        let generation = core.generation;
        let request = ConnectRequest {
            endpoint: session.endpoint.clone(),
            auth_token: session.auth_token.clone(),
            generation,
            send_timeout: self.config.send_timeout(),
        };
        debug!("[连接管理器] 打开链路 {} -> {}", generation, request.endpoint);
        core.link = Some(self.connector.open(request, self.signal_tx.clone()));

        if let Some(previous) = core.open_deadline.take() {
            previous.abort();
        }
        let weak = self.this.clone();
        let limit = self.config.connect_timeout();
        core.open_deadline = Some(tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            if let Some(shared) = weak.upgrade() {
                shared.on_open_deadline(generation);
            }
        }));
    }

    /// 立即中止当前链路。
    fn drop_link(core: &mut Core) {
        if let Some(link) = core.link.take() {
            link.abort();
            core.generation += 1;
        }
        core.link_open = false;
    }

    /// 以关闭码请求链路关闭。
    fn close_link(core: &mut Core, code: u16, reason: &str) {
        if let Some(link) = core.link.take() {
            link.close(code, reason);
            core.generation += 1;
        }
        core.link_open = false;
    }

    fn write_envelope(core: &Core, envelope: &Envelope) -> bool {
        match &core.link {
            Some(link) if core.link_open => link.send_text(MessageCodec::encode(envelope)),
            _ => false,
        }
    }

    fn stop_timers(core: &mut Core) {
        core.heartbeat.stop();
        core.scheduler.cancel();
        if let Some(deadline) = core.open_deadline.take() {
            deadline.abort();
        }
    }

    fn discard_pending(&self, core: &mut Core) {
        let count = core.pending.clear();
        if count > 0 {
            info!("[连接管理器] 丢弃 {} 条待发送消息", count);
            self.emit(ConnectionEvent::PendingDiscarded { count });
        }
    }

    // --- 链路信号 ---

    fn handle_signal(&self, signal: LinkSignal) {
        let generation = signal.generation;
        match signal.kind {
            LinkSignalKind::Opened => self.on_link_opened(generation),
            LinkSignalKind::Frame(text) => self.on_frame(generation, &text),
            LinkSignalKind::Activity => {
                let mut core = self.core.lock();
                if core.generation == generation {
                    core.heartbeat.record_inbound();
                }
            }
            LinkSignalKind::Closed { code, reason } => self.on_link_lost(generation, code, &reason),
            LinkSignalKind::Failed(detail) => self.on_link_lost(generation, None, &detail),
        }
    }

    fn on_link_opened(&self, generation: u64) {
        let mut guard = self.core.lock();
        let core = &mut *guard;
        if core.generation != generation || core.machine.state() != ConnectionState::Connecting {
            debug!("[连接管理器] 忽略过期链路 {} 的 Opened 信号", generation);
            return;
        }
        core.link_open = true;
        let token = core.session.as_ref().and_then(|s| s.auth_token.clone());
        match token {
            Some(token) => {
                // 认证信封必须是新链路上的第一帧
                if !Self::write_envelope(core, &Envelope::auth(&token)) {
                    warn!("[连接管理器] 写出认证消息失败，等待链路报告错误");
                    return;
                }
                if self.config.await_auth_ack {
                    debug!("[连接管理器] 认证消息已发送，等待服务端确认");
                    return;
                }
            }
            None => debug!("[连接管理器] 未提供认证令牌，跳过认证消息"),
        }
        self.enter_connected(core);
    }

    fn enter_connected(&self, core: &mut Core) {
        if !self.apply(core, StateEvent::Established) {
            return;
        }
        core.attempt = core.scheduler.initial_attempt();
        core.terminal = None;
        self.start_heartbeat(core);

        let pending = core.pending.drain();
        if pending.is_empty() {
            return;
        }
        info!("[连接管理器] 补发 {} 条待发送消息", pending.len());
        let mut remaining = pending.into_iter();
        while let Some(item) = remaining.next() {
            if !Self::write_envelope(core, &item.envelope) {
                warn!("[连接管理器] 补发中断，剩余消息放回队列");
                let mut unsent = vec![item];
                unsent.extend(remaining);
                core.pending.restore(unsent);
                break;
            }
        }
    }

    fn on_frame(&self, generation: u64, text: &str) {
        let envelope = {
            let mut guard = self.core.lock();
            let core = &mut *guard;
            let state = core.machine.state();
            if core.generation != generation
                || !matches!(state, ConnectionState::Connecting | ConnectionState::Connected)
            {
                debug!("[连接管理器] 忽略过期链路 {} 的消息帧", generation);
                return;
            }
            core.heartbeat.record_inbound();
            let envelope = match MessageCodec::decode_str(text) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!("[连接管理器] 丢弃无法解码的消息帧: {}", e);
                    self.emit(ConnectionEvent::DecodeFailed { detail: e.detail });
                    return;
                }
            };
            if envelope.message_type() == AUTH_MESSAGE_TYPE {
                match envelope.payload::<AuthResultPayload>() {
                    Ok(result) if !result.success => {
                        let reason = result
                            .message
                            .unwrap_or_else(|| "服务端拒绝了认证".to_string());
                        self.reject_auth(core, reason);
                        return;
                    }
                    Ok(_) => {
                        if state == ConnectionState::Connecting && self.config.await_auth_ack {
                            info!("[连接管理器] 服务端已确认认证");
                            self.enter_connected(core);
                        }
                    }
                    Err(e) => debug!("[连接管理器] auth 消息不含认证结果: {}", e),
                }
            }
            envelope
        };

        // 以下在锁外执行，处理器可以回调管理器
        let _ = self.message_tx.send(envelope.clone());
        if envelope.is_control() {
            return;
        }
        let outcome = self.dispatcher.dispatch(&envelope);
        match &outcome {
            DispatchOutcome::Handled => {}
            DispatchOutcome::Unhandled(message_type) => {
                self.emit(ConnectionEvent::UnhandledMessageType {
                    message_type: message_type.clone(),
                });
            }
            DispatchOutcome::Failed(e) => {
                self.emit(ConnectionEvent::HandlerFailed {
                    message_type: envelope.message_type().to_string(),
                    reason: e.to_string(),
                });
            }
        }

        if self.config.send_delivery_receipts
            && envelope.message_type() == CHAT_MESSAGE_TYPE
            && !matches!(outcome, DispatchOutcome::Failed(_))
        {
            if let Some(message_id) = envelope.id() {
                let receipt =
                    Envelope::message_delivered(message_id, envelope.data_str("conversationId"));
                self.send(receipt);
            }
        }
    }

    fn on_link_lost(&self, generation: u64, code: Option<u16>, reason: &str) {
        let mut guard = self.core.lock();
        let core = &mut *guard;
        let state = core.machine.state();
        if core.generation != generation {
            debug!("[连接管理器] 忽略过期链路 {} 的断开信号", generation);
            return;
        }
        if !matches!(state, ConnectionState::Connecting | ConnectionState::Connected) {
            return;
        }
        if let Some(code) = code {
            if self.config.is_auth_rejection_code(code) {
                self.reject_auth(core, format!("服务端以关闭码 {} 断开: {}", code, reason));
                return;
            }
        }
        warn!(
            "[连接管理器] 链路 {} 中断 (状态 {}，关闭码 {:?}): {}",
            generation, state, code, reason
        );
        Self::drop_link(core);
        self.apply(core, StateEvent::TransportLost);
        self.schedule_reconnect(core);
    }

    fn reject_auth(&self, core: &mut Core, reason: String) {
        error!("[连接管理器] 认证被拒绝: {}", reason);
        core.terminal = Some(TerminalReason::AuthRejected(reason.clone()));
        Self::stop_timers(core);
        Self::close_link(core, NORMAL_CLOSE_CODE, "认证失败");
        self.apply(core, StateEvent::AuthRejected);
        self.emit(ConnectionEvent::AuthRejected { reason });
        self.discard_pending(core);
        core.session = None;
    }

    // --- 定时器 ---

    fn schedule_reconnect(&self, core: &mut Core) {
        if core.machine.state() != ConnectionState::Reconnecting {
            return;
        }
        let attempt = core.attempt;
        if core.scheduler.should_give_up(&attempt) {
            error!("[连接管理器] 已重连 {} 次仍未成功，放弃重连", attempt.count);
            core.terminal = Some(TerminalReason::Exhausted(attempt.count));
            self.apply(core, StateEvent::AttemptsExhausted);
            self.emit(ConnectionEvent::ReconnectExhausted {
                attempts: attempt.count,
            });
            self.discard_pending(core);
            core.session = None;
            return;
        }
        info!(
            "[连接管理器] 第 {} 次重连将在 {}ms 后发起",
            attempt.count + 1,
            attempt.next_delay_ms
        );
        self.emit(ConnectionEvent::ReconnectScheduled {
            attempt: attempt.count + 1,
            delay_ms: attempt.next_delay_ms,
        });
        let weak = self.this.clone();
        let generation = core.generation;
        core.scheduler.schedule(attempt.next_delay(), move || {
            if let Some(shared) = weak.upgrade() {
                shared.on_retry_fired(generation);
            }
        });
    }

    fn on_retry_fired(&self, generation: u64) {
        let mut guard = self.core.lock();
        let core = &mut *guard;
        if core.generation != generation || core.machine.state() != ConnectionState::Reconnecting {
            return;
        }
        core.scheduler.release_fired();
        core.attempt = core.scheduler.advance(&core.attempt);
        if self.apply(core, StateEvent::RetryFired) {
            self.open_link(core);
        }
    }

    fn on_open_deadline(&self, generation: u64) {
        let mut guard = self.core.lock();
        let core = &mut *guard;
        if core.generation != generation || core.machine.state() != ConnectionState::Connecting {
            return;
        }
        core.open_deadline = None;
        warn!(
            "[连接管理器] 链路 {} {}: {:?} 内未完成握手",
            generation,
            WsError::ConnectionTimeout,
            self.config.connect_timeout()
        );
        Self::drop_link(core);
        self.apply(core, StateEvent::TransportLost);
        self.schedule_reconnect(core);
    }

    fn start_heartbeat(&self, core: &mut Core) {
        let weak = self.this.clone();
        let generation = core.generation;
        core.heartbeat.start(move || match weak.upgrade() {
            Some(shared) => shared.on_heartbeat_tick(generation),
            None => false,
        });
    }

    /// 心跳回调：先检查存活窗口，再写出心跳。返回 `false` 结束定时任务。
    fn on_heartbeat_tick(&self, generation: u64) -> bool {
        let mut guard = self.core.lock();
        let core = &mut *guard;
        if core.generation != generation || core.machine.state() != ConnectionState::Connected {
            return false;
        }
        let now = Instant::now();
        if core.heartbeat.is_expired(now) {
            let silent_for = core.heartbeat.silent_for(now);
            warn!("[连接管理器] 已 {:?} 未收到任何数据，判定连接失效", silent_for);
            self.emit(ConnectionEvent::HeartbeatTimedOut {
                silent_for_ms: silent_for.as_millis() as u64,
            });
            core.heartbeat.release();
            Self::drop_link(core);
            self.apply(core, StateEvent::HeartbeatTimedOut);
            self.schedule_reconnect(core);
            return false;
        }
        if Self::write_envelope(core, &Envelope::heartbeat()) {
            core.heartbeat.record_sent();
        }
        true
    }
}
