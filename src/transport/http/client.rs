use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::{panic_message, tls};
use crate::{
    protocol::{CallEnvelope, Reply},
    transport::config::{Ssl, TransportConfig},
    CallError, CallbackFault, Result,
};

/// Out-of-band sink for panics raised by call callbacks
/// 回调 panic 的带外上报通道
pub type FaultHook = Arc<dyn Fn(CallbackFault) + Send + Sync>;

type Callback = Box<dyn FnOnce(std::result::Result<Option<Value>, CallError>) + Send>;

fn default_fault_hook() -> FaultHook {
    Arc::new(|fault: CallbackFault| {
        error!(method = %fault.method, "call callback panicked: {}", fault.message);
    })
}

/// Per-call options
/// 单次调用选项
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Extra request headers, passed through unmodified
    /// 额外的请求头，原样透传
    pub headers: Vec<(String, String)>,
    /// Deadline overriding the configured one
    /// 覆盖配置的超时时间
    pub timeout: Option<Duration>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Completion state of one callback-style call
/// 单次回调式调用的完成状态
///
/// The callback slot is emptied before the callback runs, so every later
/// attempt to settle is a no-op whatever the callback does.
pub(crate) struct PendingCall {
    method: String,
    callback: Mutex<Option<Callback>>,
    fault_hook: FaultHook,
}

impl PendingCall {
    pub(crate) fn new(method: String, callback: Callback, fault_hook: FaultHook) -> Self {
        Self {
            method,
            callback: Mutex::new(Some(callback)),
            fault_hook,
        }
    }

    /// Fire the callback once; returns false if already settled
    /// 仅触发一次回调；若已完成则返回 false
    pub(crate) fn settle(&self, result: std::result::Result<Option<Value>, CallError>) -> bool {
        let callback = self
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(callback) = callback else {
            debug!(method = %self.method, "ignoring completion of settled call");
            return false;
        };

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || callback(result))) {
            (self.fault_hook)(CallbackFault {
                method: self.method.clone(),
                message: panic_message(&*payload),
            });
        }
        true
    }
}

/// HTTP client implementation
/// HTTP 客户端实现
#[derive(Clone)]
pub struct Client {
    config: Arc<TransportConfig>,
    client: reqwest::Client,
    fault_hook: FaultHook,
}

impl Client {
    /// Create a new HTTP client; prefer [`Transport::client`](crate::Transport::client)
    /// 创建一个新的 HTTP 客户端
    pub fn new(config: Arc<TransportConfig>) -> Result<Self> {
        let builder = reqwest::Client::builder();
        let builder = match config.ssl() {
            Ssl::Disabled => builder,
            Ssl::Enabled(options) => tls::client_builder(builder, options)?,
        };

        Ok(Self {
            config,
            client: builder.build()?,
            fault_hook: default_fault_hook(),
        })
    }

    /// Route callback panics to `hook` instead of the log
    /// 将回调 panic 转交给 `hook` 而不是日志
    pub fn with_fault_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(CallbackFault) + Send + Sync + 'static,
    {
        self.fault_hook = Arc::new(hook);
        self
    }

    pub fn config(&self) -> &Arc<TransportConfig> {
        &self.config
    }

    /// Calls are independent requests; nothing to open
    pub async fn connect(&self) -> Result<()> {
        Ok(())
    }

    /// Calls are independent requests; nothing to close
    pub async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    /// Issue one call and wait for its reply
    /// 发起一次调用并等待结果
    ///
    /// `Ok(None)` means the handler produced no value. When a deadline
    /// applies and passes first, the request is dropped and the late reply
    /// is never read.
    pub async fn call(
        &self,
        method: &str,
        args: Value,
        options: CallOptions,
    ) -> std::result::Result<Option<Value>, CallError> {
        let url = self.config.url().ok_or_else(|| {
            CallError::Transport(format!("no address configured for {}", self.config.path()))
        })?;

        let envelope = CallEnvelope::new(method, args);
        let mut request = self.client.post(&url).json(&envelope);
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        debug!(%url, %method, "sending call");

        let exchange = async move {
            let response = request
                .send()
                .await
                .map_err(|e| CallError::Transport(e.to_string()))?;
            let body = response
                .bytes()
                .await
                .map_err(|e| CallError::Transport(e.to_string()))?;
            Reply::decode(&body)
                .map_err(CallError::Malformed)?
                .into_result()
        };

        match options.timeout.or(self.config.timeout()) {
            Some(limit) => match tokio::time::timeout(limit, exchange).await {
                Ok(result) => result,
                Err(_) => {
                    debug!(%url, %method, "call timed out after {:?}", limit);
                    Err(CallError::Timeout(limit.as_millis()))
                }
            },
            None => exchange.await,
        }
    }

    /// Issue one call and hand its outcome to `callback`
    /// 发起一次调用并将结果交给 `callback`
    ///
    /// The callback fires exactly once. If it panics the panic is caught
    /// and reported once through the fault hook; the callback is not
    /// invoked again.
    pub fn call_with<F>(
        &self,
        method: impl Into<String>,
        args: Value,
        options: CallOptions,
        callback: F,
    ) -> JoinHandle<()>
    where
        F: FnOnce(std::result::Result<Option<Value>, CallError>) + Send + 'static,
    {
        let client = self.clone();
        let method = method.into();
        let pending = PendingCall::new(
            method.clone(),
            Box::new(callback),
            Arc::clone(&self.fault_hook),
        );

        tokio::spawn(async move {
            let result = client.call(&method, args, options).await;
            pending.settle(result);
        })
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.config.url())
            .field("timeout", &self.config.timeout())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Outcome = std::result::Result<Option<Value>, CallError>;

    fn counting_hook() -> (FaultHook, Arc<Mutex<Vec<CallbackFault>>>) {
        let faults = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&faults);
        let hook: FaultHook = Arc::new(move |fault: CallbackFault| sink.lock().unwrap().push(fault));
        (hook, faults)
    }

    #[test]
    fn test_settle_fires_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let (hook, faults) = counting_hook();
        let pending = PendingCall::new(
            "m".into(),
            Box::new(move |result: Outcome| {
                seen.fetch_add(1, Ordering::SeqCst);
                assert_eq!(result, Ok(None));
            }),
            hook,
        );

        assert!(pending.settle(Ok(None)));
        assert!(!pending.settle(Err(CallError::Timeout(10))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(faults.lock().unwrap().is_empty());
    }

    #[test]
    fn test_panicking_callback_is_reported_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let (hook, faults) = counting_hook();
        let pending = PendingCall::new(
            "explode".into(),
            Box::new(move |_: Outcome| {
                seen.fetch_add(1, Ordering::SeqCst);
                panic!("callback blew up");
            }),
            hook,
        );

        assert!(pending.settle(Ok(Some(Value::Bool(true)))));
        // a second completion, as a failing network path would produce
        assert!(!pending.settle(Err(CallError::Transport("socket hang up".into()))));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let faults = faults.lock().unwrap();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].method, "explode");
        assert_eq!(faults[0].message, "callback blew up");
    }

    #[test]
    fn test_call_options_builder() {
        let options = CallOptions::new()
            .header("x-trace", "abc")
            .timeout(Duration::from_millis(20));
        assert_eq!(options.headers, vec![("x-trace".into(), "abc".into())]);
        assert_eq!(options.timeout, Some(Duration::from_millis(20)));
    }
}
