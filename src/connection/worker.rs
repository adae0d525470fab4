//! The connection supervisor task.
//!
//! Owns the socket and is the sole mutator of the connection state. One
//! event loop handles three event kinds: client commands, socket reads and
//! subscriber-death signals. Processing is run-to-completion per event, so
//! no locks are involved anywhere.
use std::{collections::HashMap, io};

use bytes::BytesMut;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    sync::{
        mpsc::{UnboundedReceiver, UnboundedSender},
        oneshot,
    },
};

use crate::{
    Result,
    common::{ByteStr, verbose},
    connection::{
        Config,
        listeners::{ChannelEdge, ListenerHandle, Listeners, Notification},
        queue::{Request, RequestQueue, TypeHints},
    },
    error::{AuthError, ConnectError, Error},
    framer::{Frame, Framer},
    net::{Socket, default_client_config},
    postgres::{
        BackendMessage, BackendProtocol, Format, ProtocolError,
        backend::{Authentication, BackendKeyData},
        frontend::{self, FrontendProtocol},
    },
    row::{self, ColumnDesc, QueryResult},
    types::{Oid, TypeRegistry},
    value::{self, EncodedValue, Value},
};

const DEFAULT_BUF_CAPACITY: usize = 1024;

/// A client call routed into the supervisor.
pub(crate) enum Command {
    Query {
        sql: ByteStr,
        params: Vec<Value>,
        hints: Option<TypeHints>,
        reply: oneshot::Sender<Result<QueryResult>>,
    },
    Listen {
        channel: ByteStr,
        sink: UnboundedSender<Notification>,
        reply: oneshot::Sender<Result<ListenerHandle>>,
    },
    Unlisten {
        handle: ListenerHandle,
        reply: oneshot::Sender<Result<()>>,
    },
    Parameter {
        name: ByteStr,
        reply: oneshot::Sender<Option<ByteStr>>,
    },
    BackendKey {
        reply: oneshot::Sender<Option<BackendKeyData>>,
    },
    Close {
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Top-level state label of the connection.
///
/// The handshake (tcp connect, ssl negotiation, authentication, parameter
/// ingestion) runs sequentially inside [`Worker::connect`]; the event loop
/// owns every phase from `Bootstrapping` on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Connecting,
    Authenticating,
    Bootstrapping,
    Ready,
    BusySimple,
    BusyExtendedParse,
    BusyExtendedBind,
    BusyExtendedExecute,
    BusySync,
    Terminating,
}

/// Accumulation state of the in-flight request.
#[derive(Default)]
struct Collector {
    columns: Vec<ColumnDesc>,
    rows: Vec<Vec<Value>>,
    tag: Option<ByteStr>,
    error: Option<Error>,
}

impl Collector {
    fn reset(&mut self) {
        *self = Collector::default();
    }

    /// Attach an error to the in-flight request; the first one wins.
    fn fail(&mut self, err: Error) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn finish(&mut self) -> Result<QueryResult> {
        let me = std::mem::take(self);
        if let Some(err) = me.error {
            return Err(err);
        }
        let command_tag = me.tag.unwrap_or_default();
        Ok(QueryResult {
            columns: me.columns.into_iter().map(|c| c.name).collect(),
            rows: me.rows,
            rows_affected: row::rows_affected(&command_tag),
            command_tag,
        })
    }
}

pub(crate) struct Worker {
    socket: Socket,
    framer: Framer,
    write_buf: BytesMut,
    config: Config,

    phase: Phase,
    parameters: HashMap<ByteStr, ByteStr>,
    backend_key: Option<BackendKeyData>,
    types: Option<TypeRegistry>,
    collector: Collector,

    queue: RequestQueue,
    listeners: Listeners,
    deaths_tx: UnboundedSender<ListenerHandle>,
}

impl Worker {
    /// Establish the transport and drive the handshake up to the first
    /// `ReadyForQuery`.
    pub(crate) async fn connect(
        config: Config,
        deaths_tx: UnboundedSender<ListenerHandle>,
    ) -> Result<Worker> {
        tracing::debug!(
            host = %config.host,
            port = config.port,
            dbname = %config.dbname,
            ssl = config.ssl,
            "connecting",
        );

        let mut socket = if config.host.starts_with('/') {
            #[cfg(unix)]
            {
                Socket::connect_unix(&format!("{}/.s.PGSQL.{}", config.host, config.port)).await?
            }
            #[cfg(not(unix))]
            {
                return Err(
                    ConnectError::new("unix sockets are not supported on this platform").into()
                );
            }
        } else {
            Socket::connect_tcp(&config.host, config.port).await?
        };

        if config.ssl {
            let mut buf = BytesMut::new();
            frontend::SslRequest.write(&mut buf);
            socket.write_all(&buf).await?;

            // the reply is a single byte, not a regular frame
            let mut answer = [0u8; 1];
            socket.read_exact(&mut answer).await?;
            match answer[0] {
                b'S' => {
                    let tls = match &config.ssl_opts {
                        Some(config) => config.clone(),
                        None => default_client_config()?,
                    };
                    socket = socket.upgrade_tls(&config.host, tls).await?;
                }
                b'N' => return Err(ConnectError::new("server refused ssl").into()),
                other => return Err(ProtocolError::unexpected("SslResponse", other).into()),
            }
        }

        let mut worker = Worker {
            socket,
            framer: Framer::new(),
            write_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
            config,
            phase: Phase::Connecting,
            parameters: HashMap::new(),
            backend_key: None,
            types: None,
            collector: Collector::default(),
            queue: RequestQueue::new(),
            listeners: Listeners::new(),
            deaths_tx,
        };
        worker.authenticate().await?;
        Ok(worker)
    }

    /// Startup message, authentication exchange and parameter ingestion,
    /// up to the first `ReadyForQuery`.
    async fn authenticate(&mut self) -> Result<()> {
        self.phase = Phase::Authenticating;

        let user = self.config.user.clone();
        let pass = self.config.pass.clone();
        let dbname = self.config.dbname.clone();
        let startup_params = self.config.parameters.clone();

        frontend::Startup {
            user: &user,
            database: &dbname,
            parameters: &startup_params,
        }
        .write(&mut self.write_buf);
        self.flush().await?;

        loop {
            match self.recv().await? {
                BackendMessage::Authentication(auth) => match auth {
                    Authentication::Ok => break,
                    Authentication::CleartextPassword => {
                        self.send(frontend::PasswordMessage { password: &pass });
                        self.flush().await?;
                    }
                    Authentication::MD5Password { salt } => {
                        let digest = md5_password(&user, &pass, salt);
                        self.send(frontend::PasswordMessage { password: &digest });
                        self.flush().await?;
                    }
                    _ => return Err(AuthError::Unsupported.into()),
                },
                BackendMessage::ErrorResponse(err) => {
                    return Err(AuthError::Rejected(err.to_server_error()?).into());
                }
                msg => {
                    return Err(
                        ProtocolError::unexpected_phase(msg.msgtype(), "authenticating").into()
                    );
                }
            }
        }

        // In this phase a backend process is being started, and the frontend
        // is just an interested bystander.
        loop {
            match self.recv().await? {
                BackendMessage::ReadyForQuery(_) => break,
                BackendMessage::ParameterStatus(p) => {
                    self.parameters.insert(p.name, p.value);
                }
                BackendMessage::BackendKeyData(key) => self.backend_key = Some(key),
                BackendMessage::NoticeResponse(notice) => {
                    if let Ok(notice) = notice.to_server_error() {
                        tracing::warn!(notice = %notice);
                    }
                }
                BackendMessage::ErrorResponse(err) => {
                    let err = err.to_server_error()?;
                    return Err(ConnectError::new(format!("startup failed: {err}")).into());
                }
                msg => {
                    return Err(ProtocolError::unexpected_phase(msg.msgtype(), "startup").into());
                }
            }
        }

        tracing::debug!(tls = self.socket.is_tls(), "connection authenticated");
        Ok(())
    }

    /// The supervisor event loop. Consumes the worker; runs until the
    /// connection closes.
    pub(crate) async fn run(
        mut self,
        mut commands: UnboundedReceiver<Command>,
        mut deaths: UnboundedReceiver<ListenerHandle>,
    ) {
        if self.config.fetch_types {
            self.phase = Phase::Ready;
            self.queue.push_back(Request::Bootstrap);
        } else {
            self.types = Some(TypeRegistry::builtin());
            self.phase = Phase::Ready;
        }

        match self.event_loop(&mut commands, &mut deaths).await {
            Ok(()) => self.shutdown(true).await,
            Err(err) => {
                tracing::error!(error = %err, "connection terminated");
                self.shutdown(false).await;
            }
        }
    }

    async fn event_loop(
        &mut self,
        commands: &mut UnboundedReceiver<Command>,
        deaths: &mut UnboundedReceiver<ListenerHandle>,
    ) -> Result<()> {
        enum Event {
            Command(Option<Command>),
            Death(Option<ListenerHandle>),
            Read(io::Result<usize>),
        }

        // start the bootstrap request, if any
        self.pump()?;
        self.flush().await?;

        loop {
            let event = {
                let Worker { socket, framer, .. } = self;
                tokio::select! {
                    cmd = commands.recv() => Event::Command(cmd),
                    death = deaths.recv() => Event::Death(death),
                    read = socket.read_buf(framer.buf_mut()) => Event::Read(read),
                }
            };

            match event {
                // every client handle is gone
                Event::Command(None) => return Ok(()),
                Event::Command(Some(cmd)) => {
                    if !self.apply_command(cmd)? {
                        return Ok(());
                    }
                }
                Event::Death(Some(handle)) => self.subscriber_gone(handle)?,
                // the worker keeps a sender, this does not happen
                Event::Death(None) => {}
                Event::Read(Ok(0)) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "backend closed the connection",
                    )
                    .into());
                }
                Event::Read(Ok(_)) => {
                    // each frame is interpreted before the next is parsed;
                    // a frame may change the phase the next one lands in
                    while let Some(frame) = self.framer.next()? {
                        self.on_frame(frame)?;
                    }
                }
                Event::Read(Err(err)) => return Err(err.into()),
            }

            self.flush().await?;
        }
    }

    /// Returns `false` when the loop should stop (graceful close).
    fn apply_command(&mut self, cmd: Command) -> Result<bool> {
        match cmd {
            Command::Query { sql, params, hints, reply } => {
                self.queue.push_back(Request::Query { sql, params, hints, reply: Some(reply) });
                self.pump()?;
            }
            Command::Listen { channel, sink, reply } => {
                let watched = sink.clone();
                let (handle, edge) = self.listeners.insert(channel.clone(), sink);

                // observe the subscriber's death through its receiver
                let deaths = self.deaths_tx.clone();
                tokio::spawn(async move {
                    watched.closed().await;
                    let _ = deaths.send(handle);
                });

                match edge {
                    ChannelEdge::First => {
                        tracing::trace!(%channel, %handle, "first subscriber, issuing LISTEN");
                        self.queue.push_back(Request::Listen {
                            channel,
                            handle,
                            reply: Some(reply),
                        });
                        self.pump()?;
                    }
                    _ => {
                        let _ = reply.send(Ok(handle));
                    }
                }
            }
            Command::Unlisten { handle, reply } => match self.listeners.remove(handle) {
                None => {
                    let _ = reply.send(Err(Error::argument("unknown listener handle")));
                }
                Some((channel, ChannelEdge::Drained)) => {
                    tracing::trace!(%channel, %handle, "channel drained, issuing UNLISTEN");
                    self.inject(Request::Unlisten { channel, reply: Some(reply) })?;
                }
                Some(_) => {
                    let _ = reply.send(Ok(()));
                }
            },
            Command::Parameter { name, reply } => {
                let _ = reply.send(self.parameters.get(name.as_str()).cloned());
            }
            Command::BackendKey { reply } => {
                let _ = reply.send(self.backend_key);
            }
            Command::Close { reply } => {
                let _ = reply.send(Ok(()));
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Implicit unlisten for a dead subscriber; no caller reply is due.
    fn subscriber_gone(&mut self, handle: ListenerHandle) -> Result<()> {
        if let Some((channel, ChannelEdge::Drained)) = self.listeners.remove(handle) {
            tracing::trace!(%channel, %handle, "subscriber died, issuing UNLISTEN");
            self.inject(Request::Unlisten { channel, reply: None })?;
        }
        Ok(())
    }

    /// Place an internal request ahead of the queue without disturbing the
    /// in-flight head, and start it when idle.
    fn inject(&mut self, request: Request) -> Result<()> {
        match self.phase {
            Phase::Ready => {
                self.queue.inject_front(request);
                self.pump()
            }
            _ => {
                self.queue.inject_after_head(request);
                Ok(())
            }
        }
    }

    /// Start the head request if the connection is idle.
    fn pump(&mut self) -> Result<()> {
        if self.phase != Phase::Ready || self.queue.is_empty() {
            return Ok(());
        }
        self.start_head()
    }

    fn start_head(&mut self) -> Result<()> {
        enum Plan {
            Simple(ByteStr),
            Extended {
                sql: ByteStr,
                params: Vec<Value>,
                hints: Option<TypeHints>,
            },
        }

        self.collector.reset();

        let (plan, is_bootstrap) = match self.queue.head_mut() {
            None => return Ok(()),
            Some(Request::Bootstrap) => {
                (Plan::Simple(ByteStr::from_static(TypeRegistry::BOOTSTRAP_SQL)), true)
            }
            Some(Request::Query { sql, params, hints, .. }) => {
                if params.is_empty() && hints.is_none() {
                    (Plan::Simple(sql.clone()), false)
                } else {
                    let plan = Plan::Extended {
                        sql: sql.clone(),
                        params: std::mem::take(params),
                        hints: hints.take(),
                    };
                    (plan, false)
                }
            }
            // the channel name is forwarded verbatim; quoting is on the caller
            Some(Request::Listen { channel, .. }) => {
                (Plan::Simple(format!("LISTEN {channel}").into()), false)
            }
            Some(Request::Unlisten { channel, .. }) => {
                (Plan::Simple(format!("UNLISTEN {channel}").into()), false)
            }
        };

        match plan {
            Plan::Simple(sql) => {
                tracing::trace!(sql = %sql, "starting simple query");
                self.send(frontend::Query { sql: &sql });
                self.phase = match is_bootstrap {
                    true => Phase::Bootstrapping,
                    false => Phase::BusySimple,
                };
            }
            Plan::Extended { sql, params, hints } => {
                tracing::trace!(sql = %sql, params = params.len(), "starting extended query");
                self.start_extended(&sql, params, hints)?;
            }
        }
        Ok(())
    }

    /// Pipeline `Parse`/`Describe`/`Bind`/`Execute`/`Sync` in one flush.
    ///
    /// With both type hint lists supplied the `Describe` round trip is
    /// skipped and the result columns are seeded from the hints.
    fn start_extended(
        &mut self,
        sql: &str,
        params: Vec<Value>,
        hints: Option<TypeHints>,
    ) -> Result<()> {
        let encoded = self.encode_params(&params);

        let param_oids: Vec<Oid> = match &hints {
            Some(hints) => hints.param_types.clone(),
            None => encoded.iter().map(|e| e.oid).collect(),
        };

        let (describe, result_formats) = match &hints {
            Some(hints) => {
                let formats: Vec<Format> =
                    hints.result_types.iter().map(|oid| self.format_of(*oid)).collect();
                self.collector.columns = hints
                    .result_types
                    .iter()
                    .zip(&formats)
                    .map(|(oid, format)| ColumnDesc {
                        name: ByteStr::default(),
                        oid: *oid,
                        format: *format,
                    })
                    .collect();
                (false, formats)
            }
            // without hints every result column arrives in text format
            None => (true, Vec::new()),
        };

        self.send(frontend::Parse { statement: "", sql, param_oids: &param_oids });
        if describe {
            self.send(frontend::Describe { kind: b'S', name: "" });
        }
        self.send(frontend::Bind {
            portal: "",
            statement: "",
            params: &encoded,
            result_formats: &result_formats,
        });
        self.send(frontend::Execute { portal: "", max_rows: 0 });
        self.send(frontend::Sync);

        self.phase = Phase::BusyExtendedParse;
        Ok(())
    }

    fn encode_params(&self, params: &[Value]) -> Vec<EncodedValue> {
        params
            .iter()
            .map(|value| {
                if let Some(encoder) = &self.config.encoder
                    && let Some(encoded) = encoder(value)
                {
                    return encoded;
                }
                value.encode(Format::Binary)
            })
            .collect()
    }

    fn format_of(&self, oid: Oid) -> Format {
        match &self.config.formatter {
            Some(formatter) => formatter(oid),
            None => value::default_format(oid),
        }
    }

    /// Interpret one inbound frame relative to the current phase.
    fn on_frame(&mut self, frame: Frame) -> Result<()> {
        verbose!(msgtype = %(frame.msgtype as char), len = frame.body.len(), "frame");

        let msg = BackendMessage::decode(frame.msgtype, frame.body)?;

        // asynchronous messages may arrive in any phase after authentication
        let msg = match msg {
            BackendMessage::ParameterStatus(p) => {
                tracing::trace!(name = %p.name, value = %p.value, "parameter status");
                self.parameters.insert(p.name, p.value);
                return Ok(());
            }
            BackendMessage::NoticeResponse(notice) => {
                if let Ok(notice) = notice.to_server_error() {
                    tracing::warn!(notice = %notice);
                }
                return Ok(());
            }
            BackendMessage::NotificationResponse(n) => {
                let delivered = self.listeners.dispatch(&n.channel, &n.payload);
                tracing::trace!(channel = %n.channel, pid = n.process_id, delivered, "notification");
                return Ok(());
            }
            msg => msg,
        };

        let msgtype = msg.msgtype();
        match self.phase {
            Phase::Bootstrapping | Phase::BusySimple => self.on_simple_frame(msg),
            Phase::BusyExtendedParse
            | Phase::BusyExtendedBind
            | Phase::BusyExtendedExecute
            | Phase::BusySync => self.on_extended_frame(msg),
            Phase::Ready => match msg {
                BackendMessage::BackendKeyData(key) => {
                    self.backend_key = Some(key);
                    Ok(())
                }
                // an error outside any query context is fatal
                BackendMessage::ErrorResponse(err) => Err(err.to_server_error()?.into()),
                _ => Err(ProtocolError::unexpected_phase(msgtype, "idle").into()),
            },
            Phase::Terminating => Ok(()),
            Phase::Connecting | Phase::Authenticating => {
                Err(ProtocolError::unexpected_phase(msgtype, "startup").into())
            }
        }
    }

    fn on_simple_frame(&mut self, msg: BackendMessage) -> Result<()> {
        match msg {
            BackendMessage::RowDescription(rd) => {
                self.collector.columns = rd
                    .fields
                    .into_iter()
                    .map(|f| ColumnDesc { name: f.name, oid: f.oid, format: f.format })
                    .collect();
            }
            BackendMessage::DataRow(row) => self.collect_row(row.columns)?,
            BackendMessage::CommandComplete(c) => self.collector.tag = Some(c.tag),
            BackendMessage::EmptyQueryResponse(_) => self.collector.tag = Some(ByteStr::default()),
            BackendMessage::ErrorResponse(err) => {
                let err = err.to_server_error()?;
                tracing::debug!(error = %err, "query failed");
                self.collector.fail(err.into());
            }
            BackendMessage::BackendKeyData(key) => self.backend_key = Some(key),
            BackendMessage::ReadyForQuery(_) => self.complete_head()?,
            msg => {
                return Err(ProtocolError::unexpected_phase(msg.msgtype(), "simple query").into());
            }
        }
        Ok(())
    }

    fn on_extended_frame(&mut self, msg: BackendMessage) -> Result<()> {
        match (self.phase, msg) {
            // after an error the backend discards until Sync, then answers
            // ReadyForQuery; collect the error and wait it out
            (_, BackendMessage::ErrorResponse(err)) => {
                let err = err.to_server_error()?;
                tracing::debug!(error = %err, "query failed");
                self.collector.fail(err.into());
                self.phase = Phase::BusySync;
            }
            (Phase::BusySync, BackendMessage::ReadyForQuery(_)) => self.complete_head()?,

            (Phase::BusyExtendedParse, BackendMessage::ParseComplete(_)) => {
                self.phase = Phase::BusyExtendedBind;
            }

            // answers to Describe; the Bind already went out, so these are
            // informational only
            (Phase::BusyExtendedBind, BackendMessage::ParameterDescription(_)) => {}
            (Phase::BusyExtendedBind, BackendMessage::RowDescription(rd)) => {
                // Bind requested the default (text) format for every column
                self.collector.columns = rd
                    .fields
                    .into_iter()
                    .map(|f| ColumnDesc { name: f.name, oid: f.oid, format: Format::Text })
                    .collect();
            }
            (Phase::BusyExtendedBind, BackendMessage::NoData(_)) => {}
            (Phase::BusyExtendedBind, BackendMessage::BindComplete(_)) => {
                self.phase = Phase::BusyExtendedExecute;
            }

            (Phase::BusyExtendedExecute, BackendMessage::DataRow(row)) => {
                self.collect_row(row.columns)?;
            }
            (Phase::BusyExtendedExecute, BackendMessage::CommandComplete(c)) => {
                self.collector.tag = Some(c.tag);
                self.phase = Phase::BusySync;
            }
            (Phase::BusyExtendedExecute, BackendMessage::EmptyQueryResponse(_)) => {
                self.collector.tag = Some(ByteStr::default());
                self.phase = Phase::BusySync;
            }
            // a paged portal hit its row limit; treated as completion
            // with partial rows
            (Phase::BusyExtendedExecute, BackendMessage::PortalSuspended(_)) => {
                self.phase = Phase::BusySync;
            }

            (_, msg) => {
                return Err(
                    ProtocolError::unexpected_phase(msg.msgtype(), "extended query").into()
                );
            }
        }
        Ok(())
    }

    fn collect_row(&mut self, raw: Vec<Option<bytes::Bytes>>) -> Result<()> {
        // a prior failure already owns the reply; drain remaining rows
        if self.collector.error.is_some() {
            return Ok(());
        }
        if raw.len() != self.collector.columns.len() {
            return Err(ProtocolError::malformed("DataRow").into());
        }

        let mut values = Vec::with_capacity(raw.len());
        let mut failure = None;

        for (desc, raw) in self.collector.columns.iter().zip(raw) {
            let decoded = 'decode: {
                if let Some(decoder) = &self.config.decoder
                    && let Some(value) = decoder(desc.oid, desc.format, raw.as_ref())
                {
                    break 'decode Ok(value);
                }
                if !value::has_builtin_codec(desc.oid) {
                    // the registry can at least name what it is we are
                    // passing through raw
                    let name = self.types.as_ref().and_then(|t| t.name(desc.oid));
                    tracing::trace!(oid = desc.oid, name, "no decoder for type, passing through");
                }
                Value::decode(desc.oid, desc.format, raw)
            };
            match decoded {
                Ok(value) => values.push(value),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        match failure {
            Some(err) => self.collector.fail(err.into()),
            None => self.collector.rows.push(values),
        }
        Ok(())
    }

    /// `ReadyForQuery` arrived: pop the head, deliver its reply, and start
    /// whatever is queued next.
    fn complete_head(&mut self) -> Result<()> {
        let Some(request) = self.queue.pop_head() else {
            return Err(ProtocolError::unexpected_phase(b'Z', "idle").into());
        };
        let outcome = self.collector.finish();

        match request {
            Request::Bootstrap => {
                // a failing bootstrap leaves the connection unusable
                let result = outcome?;
                let types = TypeRegistry::from_result(&result);
                tracing::debug!(types = types.len(), "type registry bootstrapped");
                self.types = Some(types);
            }
            Request::Listen { channel, handle, reply } => match outcome {
                Ok(_) => {
                    if let Some(reply) = reply {
                        let _ = reply.send(Ok(handle));
                    }
                }
                Err(err) => {
                    // roll the registration back, the backend never
                    // subscribed us
                    tracing::debug!(%channel, %handle, "LISTEN failed");
                    self.listeners.remove(handle);
                    if let Some(reply) = reply {
                        let _ = reply.send(Err(err));
                    }
                }
            },
            request => request.reply(outcome),
        }

        self.phase = Phase::Ready;
        self.pump()
    }

    /// Close the connection; on the graceful path a `Terminate` goes out
    /// first. Every still-queued request gets a terminal error.
    async fn shutdown(&mut self, graceful: bool) {
        self.phase = Phase::Terminating;

        for request in self.queue.drain() {
            request.reject();
        }

        if graceful {
            self.write_buf.clear();
            self.send(frontend::Terminate);
            let _ = self.flush().await;
        }
        let _ = self.socket.shutdown().await;
        tracing::debug!(graceful, "connection closed");
    }

    fn send<F: FrontendProtocol>(&mut self, message: F) {
        frontend::write(message, &mut self.write_buf);
    }

    async fn flush(&mut self) -> io::Result<()> {
        if self.write_buf.is_empty() {
            return Ok(());
        }
        self.socket.write_all_buf(&mut self.write_buf).await?;
        self.socket.flush().await
    }

    /// Receive one backend message; used by the sequential handshake only.
    async fn recv(&mut self) -> Result<BackendMessage> {
        loop {
            if let Some(frame) = self.framer.next()? {
                verbose!(msgtype = %(frame.msgtype as char), len = frame.body.len(), "frame");
                return Ok(BackendMessage::decode(frame.msgtype, frame.body)?);
            }
            let n = self.socket.read_buf(self.framer.buf_mut()).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "backend closed the connection",
                )
                .into());
            }
        }
    }
}

/// `"md5" || hex(md5(hex(md5(password || user)) || salt))`
fn md5_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    let inner = md5::compute(format!("{password}{user}"));
    let mut outer = format!("{inner:x}").into_bytes();
    outer.extend_from_slice(&salt);
    format!("md5{:x}", md5::compute(outer))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn md5_digest_shape() {
        let digest = md5_password("bob", "hunter2", [1, 2, 3, 4]);
        assert!(digest.starts_with("md5"));
        assert_eq!(digest.len(), 3 + 32);
        assert!(digest[3..].bytes().all(|b| b.is_ascii_hexdigit()));

        // deterministic, but sensitive to every input
        assert_eq!(digest, md5_password("bob", "hunter2", [1, 2, 3, 4]));
        assert_ne!(digest, md5_password("bob", "hunter2", [4, 3, 2, 1]));
        assert_ne!(digest, md5_password("alice", "hunter2", [1, 2, 3, 4]));
    }

    #[test]
    fn collector_first_error_wins() {
        let mut collector = Collector::default();
        collector.fail(Error::argument("first"));
        collector.fail(Error::argument("second"));

        let err = collector.finish().unwrap_err();
        assert!(err.to_string().contains("first"));
    }

    #[test]
    fn collector_result_shape() {
        let mut collector = Collector::default();
        collector.columns = vec![ColumnDesc {
            name: "?column?".into(),
            oid: crate::types::oid::INT4,
            format: Format::Text,
        }];
        collector.rows.push(vec![Value::Int4(1)]);
        collector.tag = Some("SELECT 1".into());

        let result = collector.finish().unwrap();
        assert_eq!(result.columns, ["?column?"]);
        assert_eq!(result.rows, [[Value::Int4(1)]]);
        assert_eq!(result.command_tag, "SELECT 1");
        assert_eq!(result.rows_affected, 1);
        assert_eq!(result.num_rows(), 1);
    }
}
