//! Serialized directory client
//!
//! All callers funnel their work onto one socket through a command intake
//! drained by a single worker task, so at most one directory operation is
//! ever in flight. Every command ends with an admin rebind, restoring the
//! identity a user bind or a connection hiccup may have disturbed.
//! Transport-class failures restart the socket and re-enqueue the command
//! a bounded number of times.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientOptions;
use crate::directory::{
    escape_filter_value, DirEntry, DirectoryConn, DirectoryDialer, LdapDialer, PageCursor,
    SearchOutcome, SearchSpec,
};
use crate::error::LdapClientError;
use crate::mapper::{map_to_group, map_to_unit, map_to_user, normalize_login};
use crate::model::{Group, SearchRow, Unit, User};
use crate::scanner::{Fetched, PageRetriever, ResultStream};

const RETRY_BACKOFF: Duration = Duration::from_millis(20);
const MAX_NETWORK_RETRIES: u32 = 3;

/// Internal page size used to enumerate every user for OU filtering.
const ALL_USERS_PAGE_SIZE: u32 = 1000;

const GROUPS_FILTER: &str = "(|(objectclass=group)(objectclass=groupofnames)(objectclass=groupofuniquenames)(objectCategory=group))";
const UNITS_FILTER: &str = "(objectCategory=organizationalUnit)";
const ALL_USERS_FILTER: &str = "(&(objectCategory=person)(objectClass=user))";

type CommandFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
type Command = Box<dyn for<'a> FnOnce(&'a mut CommandCtx) -> CommandFuture<'a> + Send>;

type OpFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, LdapClientError>> + Send + 'a>>;
type OpFn<T> = Box<dyn for<'a> FnOnce(&'a mut dyn DirectoryConn) -> OpFuture<'a, T> + Send>;

fn command_fn<F>(f: F) -> Command
where
    F: for<'a> FnOnce(&'a mut CommandCtx) -> CommandFuture<'a> + Send + 'static,
{
    Box::new(f)
}

fn op_fn<T, F>(f: F) -> OpFn<T>
where
    F: for<'a> FnOnce(&'a mut dyn DirectoryConn) -> OpFuture<'a, T> + Send + 'static,
{
    Box::new(f)
}

/// State owned exclusively by the worker task.
struct CommandCtx {
    conn: Box<dyn DirectoryConn>,
    dialer: Arc<dyn DirectoryDialer>,
}

#[derive(Debug)]
struct Shared {
    commands: mpsc::Sender<Command>,
    opts: ClientOptions,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

/// Serialized LDAP/Active Directory client.
///
/// Cheap to clone; all clones share the one socket and the one command
/// intake.
#[derive(Clone, Debug)]
pub struct DirectoryClient {
    shared: Arc<Shared>,
}

impl DirectoryClient {
    /// Dial the directory, bind as admin, and start the command worker.
    ///
    /// The worker observes `cancel` and closes the client on cancellation,
    /// after which every operation fails fast.
    pub async fn connect(
        opts: ClientOptions,
        cancel: CancellationToken,
    ) -> Result<Self, LdapClientError> {
        let dialer = Arc::new(LdapDialer::new(&opts.url, opts.debug));
        Self::with_dialer(dialer, opts, cancel).await
    }

    /// Like [`Self::connect`] but with a caller-supplied dialer. This is the
    /// substitution point for directory transports other than the default.
    pub async fn with_dialer(
        dialer: Arc<dyn DirectoryDialer>,
        opts: ClientOptions,
        cancel: CancellationToken,
    ) -> Result<Self, LdapClientError> {
        opts.validate()
            .map_err(|e| e.context("wrong ldap client options"))?;

        let mut conn = match tokio::time::timeout(opts.timeout, dialer.dial(opts.timeout)).await {
            Ok(res) => res?,
            Err(_) => return Err(LdapClientError::timeout("dial")),
        };
        let bound = match tokio::time::timeout(
            opts.timeout,
            conn.bind(&opts.bind_dn, &opts.bind_password),
        )
        .await
        {
            Ok(res) => res.map_err(|e| e.context("admin bind")),
            Err(_) => Err(LdapClientError::timeout("admin bind")),
        };
        if let Err(e) = bound {
            conn.close().await;
            return Err(e);
        }

        let (commands, intake) = mpsc::channel(1);
        let shared = Arc::new(Shared {
            commands,
            opts,
            closed: AtomicBool::new(false),
            shutdown: cancel.child_token(),
        });
        let ctx = CommandCtx { conn, dialer };
        tokio::spawn(serve_commands(ctx, intake, Arc::clone(&shared)));

        info!(url = %shared.opts.url, "directory client connected");
        Ok(Self { shared })
    }

    /// Verify the admin bind still works.
    pub async fn ping(&self) -> Result<(), LdapClientError> {
        if self.is_closed() {
            return Err(LdapClientError::Closed);
        }
        let bind_dn = self.shared.opts.bind_dn.clone();
        let bind_password = self.shared.opts.bind_password.clone();
        self.execute("ping", move || {
            let dn = bind_dn.clone();
            let password = bind_password.clone();
            op_fn(move |conn: &mut dyn DirectoryConn| {
                Box::pin(async move { conn.bind(&dn, &password).await })
            })
        })
        .await
    }

    /// Authenticate `login` by locating its DN and binding with `password`.
    ///
    /// The user bind changes the socket's authenticated identity; the
    /// command post-step rebinds as admin before the next operation runs.
    pub async fn auth(&self, login: &str, password: &str) -> Result<User, LdapClientError> {
        if self.is_closed() {
            return Err(LdapClientError::Closed);
        }
        let user = self.search_by_logon(login).await?;
        let dn = user.dn.clone();
        let password = password.to_string();
        self.execute("auth bind", move || {
            let dn = dn.clone();
            let password = password.clone();
            op_fn(move |conn: &mut dyn DirectoryConn| {
                Box::pin(async move { conn.bind(&dn, &password).await })
            })
        })
        .await?;
        Ok(user)
    }

    /// Look up a single user by logon name (`sAMAccountName` or UPN).
    pub async fn search_by_logon(&self, login: &str) -> Result<User, LdapClientError> {
        if self.is_closed() {
            return Err(LdapClientError::Closed);
        }
        let login = normalize_login(login);
        let filter = format!(
            "(&(objectClass=organizationalPerson)(|(sAMAccountName:={l})(userPrincipalName:={l})))",
            l = escape_filter_value(&login)
        );
        let spec = SearchSpec {
            base_dn: self.shared.opts.base_dn.clone(),
            filter,
            page: None,
        };
        let outcome = self.run_search("search by logon", spec).await?;
        let Some(entry) = outcome.entries.first() else {
            return Err(LdapClientError::not_found("user"));
        };
        Ok(map_to_user(entry))
    }

    /// Run a raw filter and return every entry as an attribute map.
    pub async fn search(&self, query: &str) -> Result<Vec<SearchRow>, LdapClientError> {
        if self.is_closed() {
            return Err(LdapClientError::Closed);
        }
        let spec = SearchSpec {
            base_dn: self.shared.opts.base_dn.clone(),
            filter: query.to_string(),
            page: None,
        };
        let outcome = self
            .run_search("search", spec)
            .await
            .map_err(|e| e.context("ldap search"))?;

        Ok(outcome
            .entries
            .into_iter()
            .map(|entry| {
                let mut row = SearchRow::new();
                row.insert("DN".to_string(), serde_json::Value::String(entry.dn));
                for (name, values) in entry.attrs {
                    row.insert(name, serde_json::json!(values));
                }
                row
            })
            .collect())
    }

    /// Stream every group, one server page per [`ResultStream::next`].
    pub fn groups(&self, page_size: u32) -> Result<ResultStream<Group>, LdapClientError> {
        if self.is_closed() {
            return Err(LdapClientError::Closed);
        }
        Ok(self.paged_stream("groups search", GROUPS_FILTER.to_string(), page_size, map_to_group))
    }

    /// Stream every organizational unit.
    pub fn organizational_units(
        &self,
        page_size: u32,
    ) -> Result<ResultStream<Unit>, LdapClientError> {
        if self.is_closed() {
            return Err(LdapClientError::Closed);
        }
        Ok(self.paged_stream("units search", UNITS_FILTER.to_string(), page_size, map_to_unit))
    }

    /// Stream the members of one group.
    pub fn group_users(
        &self,
        group_dn: &str,
        page_size: u32,
    ) -> Result<ResultStream<User>, LdapClientError> {
        if self.is_closed() {
            return Err(LdapClientError::Closed);
        }
        let filter = format!(
            "(&(objectCategory=person)(objectClass=user)(memberOf={}))",
            escape_filter_value(group_dn)
        );
        Ok(self.paged_stream("group users search", filter, page_size, map_to_user))
    }

    /// Stream users whose DN sits under any of the named organizational
    /// units (case-insensitive). Pages out at `page_size` regardless of the
    /// server's raw page size; directory enumeration order is preserved.
    pub fn ou_users(
        &self,
        page_size: u32,
        ou_names: &[&str],
    ) -> Result<ResultStream<User>, LdapClientError> {
        if self.is_closed() {
            return Err(LdapClientError::Closed);
        }
        let inner = self.paged_stream(
            "all users search",
            ALL_USERS_FILTER.to_string(),
            ALL_USERS_PAGE_SIZE,
            map_to_user,
        );
        let needles = ou_names
            .iter()
            .map(|name| format!("ou={},", name.trim().to_lowercase()))
            .collect();
        Ok(ResultStream::from_retriever(Box::new(OuFilterRetriever {
            inner,
            needles,
            page_size,
            carry: Vec::new(),
        })))
    }

    /// Close the client. Idempotent; pending and future operations fail
    /// fast once the worker observes the shutdown.
    pub fn close(&self) {
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            info!("directory client closing");
            self.shared.shutdown.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst) || self.shared.commands.is_closed()
    }

    fn paged_stream<T: Send + 'static>(
        &self,
        operation: &'static str,
        filter: String,
        page_size: u32,
        mapper: fn(&DirEntry) -> T,
    ) -> ResultStream<T> {
        ResultStream::from_retriever(Box::new(PagedRetriever {
            client: self.clone(),
            operation,
            filter,
            page_size,
            cookie: Vec::new(),
            mapper,
        }))
    }

    async fn run_search(
        &self,
        operation: &'static str,
        spec: SearchSpec,
    ) -> Result<SearchOutcome, LdapClientError> {
        self.execute(operation, move || {
            let spec = spec.clone();
            op_fn(move |conn: &mut dyn DirectoryConn| {
                Box::pin(async move { conn.search(&spec).await })
            })
        })
        .await
    }

    /// Submit one operation to the worker and wait for its completion,
    /// restarting the socket and re-enqueueing on transport failures.
    async fn execute<T, B>(&self, operation: &'static str, build: B) -> Result<T, LdapClientError>
    where
        T: Send + 'static,
        B: Fn() -> OpFn<T>,
    {
        let mut retries = 0u32;
        loop {
            if self.is_closed() {
                return Err(LdapClientError::Closed);
            }
            let (reply, answer) = oneshot::channel();
            let cmd = self.command(operation, build(), reply);
            if self.shared.commands.send(cmd).await.is_err() {
                return Err(LdapClientError::Closed);
            }
            let result = match answer.await {
                Ok(result) => result,
                Err(_) => return Err(LdapClientError::Closed),
            };
            match result {
                Err(e) if e.is_network() && retries < MAX_NETWORK_RETRIES => {
                    retries += 1;
                    debug!(
                        operation,
                        retries,
                        error = %e,
                        "transport failure, restarting directory socket"
                    );
                    self.reconnect().await;
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
                other => return other,
            }
        }
    }

    /// Build the command envelope: run the operation under the configured
    /// deadline, then rebind as admin whatever the outcome was.
    fn command<T: Send + 'static>(
        &self,
        operation: &'static str,
        op: OpFn<T>,
        reply: oneshot::Sender<Result<T, LdapClientError>>,
    ) -> Command {
        let timeout = self.shared.opts.timeout;
        let bind_dn = self.shared.opts.bind_dn.clone();
        let bind_password = self.shared.opts.bind_password.clone();
        command_fn(move |ctx: &mut CommandCtx| {
            Box::pin(async move {
                let result = match tokio::time::timeout(timeout, op(ctx.conn.as_mut())).await {
                    Ok(result) => result,
                    Err(_) => Err(LdapClientError::timeout(operation)),
                };
                let rebind = match tokio::time::timeout(
                    timeout,
                    ctx.conn.bind(&bind_dn, &bind_password),
                )
                .await
                {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(e.context("admin rebind")),
                    Err(_) => Some(LdapClientError::timeout("admin rebind")),
                };
                let result = match (result, rebind) {
                    (result, None) => result,
                    (Ok(_), Some(rebind_err)) => Err(rebind_err),
                    (Err(op_err), Some(rebind_err)) => {
                        Err(LdapClientError::merged(op_err, rebind_err))
                    }
                };
                let _ = reply.send(result);
            })
        })
    }

    /// Replace the worker's socket with a freshly dialed, admin-bound one.
    async fn reconnect(&self) {
        let timeout = self.shared.opts.timeout;
        let bind_dn = self.shared.opts.bind_dn.clone();
        let bind_password = self.shared.opts.bind_password.clone();
        let (reply, done) = oneshot::channel::<()>();
        let cmd = command_fn(move |ctx: &mut CommandCtx| {
            Box::pin(async move {
                match tokio::time::timeout(timeout, ctx.dialer.dial(timeout)).await {
                    Ok(Ok(mut fresh)) => {
                        match tokio::time::timeout(
                            timeout,
                            fresh.bind(&bind_dn, &bind_password),
                        )
                        .await
                        {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => warn!(error = %e, "admin bind after socket restart failed"),
                            Err(_) => warn!("admin bind after socket restart timed out"),
                        }
                        let mut old = std::mem::replace(&mut ctx.conn, fresh);
                        old.close().await;
                    }
                    Ok(Err(e)) => warn!(error = %e, "directory socket restart failed"),
                    Err(_) => warn!("directory socket restart timed out"),
                }
                let _ = reply.send(());
            })
        });
        if self.shared.commands.send(cmd).await.is_ok() {
            let _ = done.await;
        }
    }
}

/// Worker loop: sole owner of the socket. Runs commands in intake order
/// until the intake closes or shutdown is observed.
async fn serve_commands(
    mut ctx: CommandCtx,
    mut intake: mpsc::Receiver<Command>,
    shared: Arc<Shared>,
) {
    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            cmd = intake.recv() => match cmd {
                Some(cmd) => cmd(&mut ctx).await,
                None => break,
            },
        }
    }
    shared.closed.store(true, Ordering::SeqCst);
    ctx.conn.close().await;
    debug!("directory client worker stopped");
}

/// Retriever walking one server-paged search, one page per call. Owns the
/// paging cookie; an empty response cookie ends the stream.
struct PagedRetriever<T> {
    client: DirectoryClient,
    operation: &'static str,
    filter: String,
    page_size: u32,
    cookie: Vec<u8>,
    mapper: fn(&DirEntry) -> T,
}

#[async_trait::async_trait]
impl<T: Send + 'static> PageRetriever<T> for PagedRetriever<T> {
    async fn fetch(&mut self) -> Result<Fetched<T>, LdapClientError> {
        let spec = SearchSpec {
            base_dn: self.client.shared.opts.base_dn.clone(),
            filter: self.filter.clone(),
            page: Some(PageCursor {
                size: self.page_size,
                cookie: self.cookie.clone(),
            }),
        };
        let outcome = self
            .client
            .run_search(self.operation, spec)
            .await
            .map_err(|e| e.context("ldap retriever in search"))?;
        let items = outcome.entries.iter().map(|e| (self.mapper)(e)).collect();
        match outcome.next_cookie {
            Some(cookie) => {
                self.cookie = cookie;
                Ok(Fetched::More(items))
            }
            None => Ok(Fetched::Last(items)),
        }
    }
}

/// Retriever thinning a full-directory user stream down to the requested
/// organizational units, re-chunked to the caller's page size. Raw-page
/// overflow is carried over and drained first on the next call.
struct OuFilterRetriever {
    inner: ResultStream<User>,
    needles: Vec<String>,
    page_size: u32,
    carry: Vec<User>,
}

#[async_trait::async_trait]
impl PageRetriever<User> for OuFilterRetriever {
    async fn fetch(&mut self) -> Result<Fetched<User>, LdapClientError> {
        let target = self.page_size.max(1) as usize;
        let mut out: Vec<User> = Vec::with_capacity(target);
        'pages: loop {
            let batch: Vec<User> = if !self.carry.is_empty() {
                std::mem::take(&mut self.carry)
            } else if self.inner.next().await {
                let mut batch = Vec::new();
                self.inner.scan(|page| batch.extend_from_slice(page));
                batch
            } else if let Some(e) = self.inner.take_last_err() {
                return Err(e);
            } else {
                break 'pages;
            };

            for (i, user) in batch.iter().enumerate() {
                let dn = user.dn.to_lowercase();
                if !self.needles.iter().any(|needle| dn.contains(needle)) {
                    continue;
                }
                out.push(user.clone());
                if out.len() == target {
                    if i + 1 < batch.len() {
                        self.carry = batch[i + 1..].to_vec();
                    }
                    break 'pages;
                }
            }
        }
        if out.len() < target {
            Ok(Fetched::Last(out))
        } else {
            Ok(Fetched::More(out))
        }
    }
}
