//! 桥接器核心 - 抑制管线、路由投递与升级 / 确认状态机
//!
//! 所有状态表（去重索引、soak 缓冲、限流计数、升级簿、确认记录）
//! 由单个 Bridge 实例独占，经由 runtime 的消息循环串行变更；
//! 定时器任务只向自身信道回发消息，不直接触碰状态。

use std::collections::{HashMap, HashSet};
use std::time::Duration as StdDuration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::command::{AckRecord, CommandKind, InboundCommand};
use super::composer::{summarize_metrics, Composer};
use super::dedupe::{DedupeCheck, DedupeIndex};
use super::dispatcher::Dispatcher;
use super::escalation::{EscalationBook, EscalationEntry, EscalationPolicy, EscalationState};
use super::event::{BusEvent, IncidentEvent, PrefsUpdate};
use super::metrics::{MetricsAggregator, SuppressReason};
use super::outbound::{AlertLevel, OutboundEvent, OutgoingNotification};
use super::quiet_hours::QuietHours;
use super::rate_limit::RateLimiter;
use super::router::RouteResolver;
use super::runtime::BridgeMsg;
use super::severity::Severity;
use super::signing::Signer;
use super::soak::{SoakBuffer, SoakEntry, SoakOffer};
use super::thread_key::{dedupe_key, thread_key};
use crate::config::BridgeConfig;

/// 抑制管线对单个事件的裁决
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// 事件被丢弃（mute / dedupe）
    Dropped(SuppressReason),
    /// 事件进入 soak 缓冲，随批量投递（quiet / soak）
    Deferred {
        reason: SuppressReason,
        thread_key: String,
    },
}

/// 桥接器实例
pub struct Bridge {
    config: BridgeConfig,
    locale: String,
    quiet: Option<QuietHours>,
    mute_symbols: HashSet<String>,
    mute_types: HashSet<String>,
    router: RouteResolver,
    /// 值班表：梯队名 -> 渠道
    roster: HashMap<String, Vec<String>>,
    dedupe: DedupeIndex,
    soak: SoakBuffer,
    soak_timers: HashMap<String, JoinHandle<()>>,
    rate: RateLimiter,
    policy: EscalationPolicy,
    escalation: EscalationBook,
    acks: HashMap<String, AckRecord>,
    /// 事件首次投递时间（确认时延用）
    first_delivery: HashMap<String, DateTime<Utc>>,
    metrics: MetricsAggregator,
    composer: Composer,
    dispatcher: Dispatcher,
    signer: Signer,
    outbound: UnboundedSender<OutboundEvent>,
    self_tx: UnboundedSender<BridgeMsg>,
}

impl Bridge {
    pub fn new(
        config: BridgeConfig,
        outbound: UnboundedSender<OutboundEvent>,
        self_tx: UnboundedSender<BridgeMsg>,
    ) -> Result<Self> {
        let quiet = config
            .quiet_hours
            .as_ref()
            .map(QuietHours::from_config)
            .transpose()?;
        let router = RouteResolver::new(&config.routes, config.default_channel.clone())?;
        let signer = Signer::new(config.secrets.signing_key.as_bytes().to_vec());
        let dispatcher = Dispatcher::new(&config.severity_colors, signer.clone());
        let policy = EscalationPolicy::from_config(&config.escalation);
        let composer = Composer::new(&config.templates);

        Ok(Self {
            locale: config.locale.clone(),
            quiet,
            mute_symbols: config.mute.symbols.iter().cloned().collect(),
            mute_types: config.mute.types.iter().cloned().collect(),
            router,
            roster: HashMap::new(),
            dedupe: DedupeIndex::new(config.dedupe.window_sec),
            soak: SoakBuffer::new(config.soak.max_batch),
            soak_timers: HashMap::new(),
            rate: RateLimiter::new(),
            policy,
            escalation: EscalationBook::new(),
            acks: HashMap::new(),
            first_delivery: HashMap::new(),
            metrics: MetricsAggregator::new(Utc::now()),
            composer,
            dispatcher,
            signer,
            outbound,
            self_tx,
            config,
        })
    }

    /// 消息循环入口：所有状态变更都经过这里串行化
    pub fn handle(&mut self, msg: BridgeMsg) {
        match msg {
            BridgeMsg::Bus(event) => self.handle_bus(event),
            BridgeMsg::SoakFlush { thread_key } => self.flush_soak(&thread_key, Utc::now()),
            BridgeMsg::EscalationFire { incident_id, stage } => {
                self.fire_escalation(&incident_id, stage, Utc::now())
            }
            BridgeMsg::MetricsFlush => self.flush_metrics(Utc::now()),
            BridgeMsg::Shutdown => {}
        }
    }

    pub fn handle_bus(&mut self, event: BusEvent) {
        match event {
            BusEvent::OncallRoster { tiers, .. } => {
                info!(tiers = tiers.len(), "On-call roster updated");
                self.roster = tiers;
            }
            BusEvent::ChannelMap { rules, .. } => match self.router.replace_rules(&rules) {
                Ok(()) => info!(rules = rules.len(), "Route table replaced"),
                Err(e) => {
                    warn!(error = %e, "Rejecting invalid channel map, keeping previous routes");
                    self.alert(
                        AlertLevel::Error,
                        format!("invalid channel map: {:#}", e),
                        Value::Null,
                    );
                }
            },
            BusEvent::Prefs { prefs, .. } => self.apply_prefs(prefs),
            BusEvent::InboundCommand { command, timestamp } => {
                self.handle_command(command, timestamp)
            }
            other => {
                if let Some(incident) = other.into_incident() {
                    if !incident.should_process() {
                        debug!(kind = incident.kind(), "Event below processing threshold");
                        return;
                    }
                    self.process_incident(incident);
                }
            }
        }
    }

    /// 抑制管线：mute -> dedupe -> quiet -> soak（短路求值）
    ///
    /// 静音时段不丢事件，只改变抑制原因并把缓冲标记为 held；
    /// 每个事件至多进入 soak 缓冲一次。
    pub fn process_incident(&mut self, event: IncidentEvent) -> ProcessOutcome {
        let now = event.timestamp();

        // 1. mute
        if let Some(symbol) = event.symbol() {
            if self.mute_symbols.contains(symbol) {
                debug!(symbol = %symbol, "Event muted by symbol");
                self.metrics.record_suppressed(SuppressReason::Mute);
                return ProcessOutcome::Dropped(SuppressReason::Mute);
            }
        }
        if let Some(incident_type) = event.incident_type() {
            if self.mute_types.contains(incident_type) {
                debug!(incident_type = %incident_type, "Event muted by type");
                self.metrics.record_suppressed(SuppressReason::Mute);
                return ProcessOutcome::Dropped(SuppressReason::Mute);
            }
        }

        // 2. dedupe
        let tkey = thread_key(&event);
        let dkey = dedupe_key(&tkey, event.severity(), now);
        if let DedupeCheck::Duplicate { count } = self.dedupe.check(&dkey, now) {
            debug!(thread_key = %tkey, count, "Duplicate suppressed");
            self.metrics.record_suppressed(SuppressReason::Dedupe);
            return ProcessOutcome::Dropped(SuppressReason::Dedupe);
        }

        // 3 + 4. quiet / soak：单次插入缓冲
        let quiet_now = self.is_quiet(now);
        let reason = if quiet_now {
            SuppressReason::Quiet
        } else {
            SuppressReason::Soak
        };
        match self.soak.offer(&tkey, event, &dkey, now, quiet_now) {
            SoakOffer::Created => {
                self.arm_soak_timer(&tkey);
                // 线程首事件只是延后投递，仅静音时段计入抑制
                if quiet_now {
                    self.metrics.record_suppressed(SuppressReason::Quiet);
                }
            }
            SoakOffer::Appended => self.metrics.record_suppressed(reason),
        }
        ProcessOutcome::Deferred {
            reason,
            thread_key: tkey,
        }
    }

    pub fn is_quiet(&self, now: DateTime<Utc>) -> bool {
        self.quiet.as_ref().map(|q| q.contains(now)).unwrap_or(false)
    }

    fn arm_soak_timer(&mut self, tkey: &str) {
        let tx = self.self_tx.clone();
        let key = tkey.to_string();
        let window = StdDuration::from_secs(self.config.soak.window_sec);
        let handle = tokio::spawn(async move {
            sleep(window).await;
            let _ = tx.send(BridgeMsg::SoakFlush { thread_key: key });
        });
        if let Some(old) = self.soak_timers.insert(tkey.to_string(), handle) {
            old.abort();
        }
    }

    /// 冲洗一个线程的 soak 缓冲
    ///
    /// 静音时段内到期的缓冲不投递，顺延一个 soak 窗口；静音结束后的
    /// 首次到期正常投递。
    pub fn flush_soak(&mut self, thread_key: &str, now: DateTime<Utc>) {
        if !self.soak.contains(thread_key) {
            self.soak_timers.remove(thread_key);
            return;
        }

        if self.is_quiet(now) {
            debug!(thread_key = %thread_key, "Quiet hours active, deferring flush");
            self.soak.mark_held(thread_key);
            self.arm_soak_timer(thread_key);
            return;
        }

        self.soak_timers.remove(thread_key);
        if let Some(entry) = self.soak.take(thread_key) {
            self.deliver(entry, now);
        }
    }

    /// 组装并投递一条（可能批量的）通知
    fn deliver(&mut self, entry: SoakEntry, now: DateTime<Utc>) {
        let Some(primary) = entry.events.first().cloned() else {
            return;
        };
        debug!(
            thread_key = %entry.thread_key,
            batched = entry.total,
            held = entry.held_for_quiet,
            waited_ms = (now - entry.first_event_at).num_milliseconds(),
            "Flushing soak buffer"
        );

        // 批量取最高严重度，窗口内的恶化不被首事件掩盖
        let severity = entry
            .events
            .iter()
            .map(|e| e.severity())
            .max()
            .unwrap_or_else(|| primary.severity());

        let mut ctx = primary.context_value();
        if let Value::Object(map) = &mut ctx {
            let summary = map.get("metrics").and_then(summarize_metrics);
            if let Some(summary) = summary {
                map.insert("metrics_summary".to_string(), Value::String(summary));
            }
        }

        let composed = self.composer.compose(&ctx, &self.locale);
        let mut title = composed.title;
        let mut body = composed.body;
        if entry.total > 1 {
            title.push_str(&format!(" ({} updates)", entry.total));
            let labels: Vec<String> = entry
                .events
                .iter()
                .skip(1)
                .map(|e| e.short_label())
                .collect();
            body.push_str(&format!(
                "\n+{} update(s): {}",
                entry.total - 1,
                labels.join("; ")
            ));
        }

        let resolution = self.router.resolve(&primary);
        let channels =
            self.rate_limited_channels(resolution.channels, resolution.rate_limit_per_min, &entry.thread_key);
        if channels.is_empty() {
            debug!(thread_key = %entry.thread_key, "All channels throttled, nothing delivered");
            return;
        }

        let requires_ack =
            self.policy.requires_ack(severity) && primary.incident_id().is_some();
        let actions = if requires_ack {
            vec!["ack".to_string(), "resolve".to_string()]
        } else {
            Vec::new()
        };

        let notification = OutgoingNotification {
            dedupe_key: entry.dedupe_key.clone(),
            channels,
            title: title.clone(),
            body,
            severity,
            thread_key: entry.thread_key.clone(),
            actions,
            context: ctx,
            ttl_sec: self.config.dedupe.window_sec,
        };

        self.metrics.record_notification();
        self.emit(OutboundEvent::NotificationOutgoing {
            notification: notification.clone(),
        });
        for event in self.dispatcher.dispatch(&notification) {
            if let Some(kind) = event.channel_type() {
                self.metrics.record_sent(kind);
            }
            self.emit(event);
        }

        if requires_ack {
            // requires_ack 蕴含 incident_id 存在
            let incident_id = primary.incident_id().unwrap_or_default().to_string();
            self.first_delivery.entry(incident_id.clone()).or_insert(now);
            self.arm_escalation(incident_id, severity, entry.thread_key.clone(), title, now);
        }
    }

    /// 按渠道限流，返回获准投递的渠道
    fn rate_limited_channels(
        &mut self,
        channels: Vec<String>,
        rule_limit: Option<u32>,
        thread_key: &str,
    ) -> Vec<String> {
        let mut allowed = Vec::with_capacity(channels.len());
        for channel in channels {
            let limit = rule_limit.unwrap_or_else(|| {
                let kind = channel.split(':').next().unwrap_or("");
                self.config.rate.limit_for(kind)
            });
            if self.rate.allow(&channel, limit) {
                allowed.push(channel);
            } else {
                warn!(channel = %channel, limit, "Channel rate limited");
                self.metrics.record_suppressed(SuppressReason::Rate);
                self.alert(
                    AlertLevel::Warn,
                    format!("rate limited on {}", channel),
                    json!({ "threadKey": thread_key }),
                );
            }
        }
        allowed
    }

    fn arm_escalation(
        &mut self,
        incident_id: String,
        severity: Severity,
        thread_key: String,
        summary: String,
        now: DateTime<Utc>,
    ) {
        if self.policy.stages.is_empty() {
            return;
        }
        if self.acks.contains_key(&incident_id) {
            debug!(incident_id = %incident_id, "Already acknowledged, not escalating");
            return;
        }

        let handle = self.spawn_escalation_timer(&incident_id, 0);
        // insert 会取消同事件已有的定时器链（幂等重启）
        self.escalation.insert(EscalationEntry {
            incident_id,
            thread_key,
            severity,
            summary,
            started_at: now,
            state: EscalationState::Pending(0),
            handle,
        });
    }

    fn spawn_escalation_timer(&self, incident_id: &str, stage: usize) -> Option<JoinHandle<()>> {
        let delay = self.policy.stage_delay(stage)?;
        let tx = self.self_tx.clone();
        let id = incident_id.to_string();
        Some(tokio::spawn(async move {
            sleep(delay).await;
            let _ = tx.send(BridgeMsg::EscalationFire {
                incident_id: id,
                stage,
            });
        }))
    }

    /// 升级梯级触发
    pub fn fire_escalation(&mut self, incident_id: &str, stage: usize, now: DateTime<Utc>) {
        // 定时器触发与处理之间到达的 ack：在途投递保留，后续梯级停止
        if self.acks.contains_key(incident_id) {
            self.escalation.cancel(incident_id);
            return;
        }
        let Some((thread_key, severity, summary, started_at)) = self
            .escalation
            .get(incident_id)
            .map(|e| (e.thread_key.clone(), e.severity, e.summary.clone(), e.started_at))
        else {
            return;
        };
        let Some(stage_config) = self.policy.stages.get(stage).cloned() else {
            return;
        };

        info!(incident_id = %incident_id, stage, "Escalation stage fired");
        self.metrics.record_escalation();

        let mut channels = stage_config.channels.clone();
        if let Some(target) = &stage_config.target {
            match self.roster.get(target) {
                Some(extra) => channels.extend(extra.iter().cloned()),
                None => {
                    warn!(tier = %target, "Unknown on-call roster tier");
                    self.alert(
                        AlertLevel::Warn,
                        format!("unknown roster tier '{}'", target),
                        json!({ "incidentId": incident_id }),
                    );
                }
            }
        }
        // 梯级渠道与值班梯队可能重叠
        let mut seen = HashSet::new();
        channels.retain(|c| seen.insert(c.clone()));

        let channels = self.rate_limited_channels(channels, None, &thread_key);
        if !channels.is_empty() {
            let notification = OutgoingNotification {
                dedupe_key: dedupe_key(&thread_key, severity, now),
                channels,
                title: format!("[escalation {}] {}", stage + 1, summary),
                body: format!(
                    "Incident {} unacknowledged for {}s",
                    incident_id,
                    (now - started_at).num_seconds()
                ),
                severity,
                thread_key: thread_key.clone(),
                actions: vec!["ack".to_string(), "resolve".to_string()],
                context: json!({ "incident_id": incident_id, "stage": stage }),
                ttl_sec: self.config.dedupe.window_sec,
            };
            self.metrics.record_notification();
            self.emit(OutboundEvent::NotificationOutgoing {
                notification: notification.clone(),
            });
            for event in self.dispatcher.dispatch(&notification) {
                if let Some(kind) = event.channel_type() {
                    self.metrics.record_sent(kind);
                }
                self.emit(event);
            }
        }

        let next = stage + 1;
        if next < self.policy.stages.len() {
            let handle = self.spawn_escalation_timer(incident_id, next);
            if let Some(entry) = self.escalation.get_mut(incident_id) {
                entry.state = EscalationState::Pending(next);
                entry.handle = handle;
            }
        } else if let Some(entry) = self.escalation.get_mut(incident_id) {
            warn!(incident_id = %incident_id, "Escalation exhausted with no acknowledgement");
            entry.state = EscalationState::Exhausted;
            entry.handle = None;
        }
    }

    /// 入站命令处理
    pub fn handle_command(&mut self, command: InboundCommand, now: DateTime<Utc>) {
        if command.signature.is_some() && !command.verify(&self.signer) {
            warn!(
                incident_id = %command.incident_id,
                user = %command.user_id,
                "Command signature verification failed, dropping"
            );
            self.metrics.record_command_rejected();
            self.alert(
                AlertLevel::Warn,
                format!(
                    "signature verification failed for {} on {}",
                    command.cmd.as_str(),
                    command.incident_id
                ),
                Value::Null,
            );
            return;
        }

        match command.cmd {
            CommandKind::Ack => {
                let incident_id = command.incident_id.clone();
                let latency = self.first_delivery.get(&incident_id).map(|first| now - *first);
                self.acks.insert(
                    incident_id.clone(),
                    AckRecord {
                        incident_id: incident_id.clone(),
                        ack_at: now,
                        by: command.origin(),
                    },
                );
                let cancelled = self.escalation.cancel(&incident_id);
                info!(incident_id = %incident_id, cancelled, "Incident acknowledged");
                self.metrics.record_ack(latency);
                self.emit(OutboundEvent::IncidentAcknowledged {
                    incident_id,
                    by: command.origin(),
                    ack_latency_sec: latency.map(|d| d.num_milliseconds() as f64 / 1000.0),
                    timestamp: now,
                });
            }
            CommandKind::Resolve => {
                let incident_id = command.incident_id.clone();
                // 解决覆盖确认簿记：清确认记录、清升级、清首投时间
                self.acks.remove(&incident_id);
                self.escalation.cancel(&incident_id);
                self.first_delivery.remove(&incident_id);
                info!(incident_id = %incident_id, "Incident resolved externally");
                self.emit(OutboundEvent::IncidentResolved {
                    incident_id,
                    by: command.origin(),
                    timestamp: now,
                });
            }
            CommandKind::Note => {
                info!(
                    incident_id = %command.incident_id,
                    note = command.note.as_deref().unwrap_or(""),
                    "Operator note"
                );
            }
        }
    }

    fn apply_prefs(&mut self, prefs: PrefsUpdate) {
        if let Some(locale) = prefs.locale {
            self.locale = locale;
        }
        if let Some(quiet_hours) = prefs.quiet_hours {
            match QuietHours::from_config(&quiet_hours) {
                Ok(quiet) => self.quiet = Some(quiet),
                Err(e) => {
                    warn!(error = %e, "Rejecting invalid quiet hours update");
                    self.alert(
                        AlertLevel::Error,
                        format!("invalid quiet hours: {:#}", e),
                        Value::Null,
                    );
                }
            }
        }
        if let Some(mute) = prefs.mute {
            self.mute_symbols = mute.symbols.into_iter().collect();
            self.mute_types = mute.types.into_iter().collect();
        }
        info!(locale = %self.locale, "Preferences updated");
    }

    /// 读取-重置指标并冲洗到总线
    pub fn flush_metrics(&mut self, now: DateTime<Utc>) {
        let snapshot = self.metrics.snapshot_and_reset(now);
        self.emit(OutboundEvent::Metrics(snapshot));
    }

    fn alert(&self, level: AlertLevel, message: String, context: Value) {
        self.emit(OutboundEvent::Alert {
            level,
            message,
            context,
        });
    }

    fn emit(&self, event: OutboundEvent) {
        // 接收端关闭只影响本条消息，不影响状态机
        let _ = self.outbound.send(event);
    }

    // ---- 状态探针（测试与 check-config 用） ----

    pub fn ack_record(&self, incident_id: &str) -> Option<&AckRecord> {
        self.acks.get(incident_id)
    }

    pub fn escalation_state(&self, incident_id: &str) -> Option<EscalationState> {
        self.escalation.get(incident_id).map(|e| e.state)
    }

    pub fn soak_pending(&self, thread_key: &str) -> bool {
        self.soak.contains(thread_key)
    }

    pub fn metrics(&self) -> &MetricsAggregator {
        &self.metrics
    }
}
