use super::*;

/// Executes device jobs over an interactive SSH shell.
///
/// Every job opens its own connection and closes it when done, so one executor
/// can be shared by all items of a batch.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    security: ConnectionSecurityOptions,
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl SshExecutor {
    pub fn new() -> Self {
        Self {
            security: ConnectionSecurityOptions::default(),
            connect_timeout: Duration::from_secs(config::DEFAULT_CONNECT_TIMEOUT_SECS),
            command_timeout: Duration::from_secs(config::DEFAULT_COMMAND_TIMEOUT_SECS),
        }
    }

    pub fn with_security(mut self, security: ConnectionSecurityOptions) -> Self {
        self.security = security;
        self
    }

    /// Budget for the handshake, login banner and first prompt.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Budget for each command to return to the prompt.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// How long the transport tolerates a silent session. Must outlast every
    /// prompt wait, or a slow command surfaces as a dropped connection.
    fn inactivity_timeout(&self) -> Duration {
        self.connect_timeout.max(self.command_timeout)
            + Duration::from_secs(config::INACTIVITY_MARGIN_SECS)
    }
}

impl Default for SshExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor<DeviceJob> for SshExecutor {
    async fn execute(&self, ctx: ItemContext<DeviceJob>) -> Result<String, OperationError> {
        let DeviceJob { profile, operation } = ctx.payload;
        let mut session = DeviceSession::connect(&profile, self).await?;

        let plan = session.shell.platform.command_plan(&operation);
        let result = session.shell.run_plan(&plan, self.command_timeout).await;

        session.close().await;
        result
    }
}

/// One SSH connection plus the shell driven over it, alive for a single job.
struct DeviceSession {
    client: Client,
    shell: CliShell,
}

impl DeviceSession {
    async fn connect(
        profile: &DeviceProfile,
        executor: &SshExecutor,
    ) -> Result<Self, OperationError> {
        let device_addr = profile.device_addr();
        let timeout = executor.connect_timeout;

        let connecting = Client::connect_with_config(
            (profile.host.clone(), profile.port),
            &profile.username,
            AuthMethod::with_password(&profile.password),
            executor.security.server_check.clone(),
            executor
                .security
                .client_config(executor.inactivity_timeout()),
        );
        let client = match tokio::time::timeout(timeout, connecting).await {
            Err(_) => return Err(OperationError::ConnectTimeout(device_addr)),
            Ok(Err(async_ssh2_tokio::Error::PasswordWrong)) => {
                return Err(OperationError::AuthenticationFailed(device_addr));
            }
            Ok(Err(err)) => return Err(err.into()),
            Ok(Ok(client)) => client,
        };
        debug!("{} TCP connection successful", device_addr);

        let shell = match open_shell(&client, profile.platform(), device_addr.clone()).await {
            Ok(shell) => shell,
            Err(err) => {
                disconnect(&client, &device_addr).await;
                return Err(err);
            }
        };

        let mut session = Self { client, shell };
        if let Err(err) = session
            .shell
            .prepare(profile.secret.as_deref(), timeout)
            .await
        {
            session.close().await;
            return Err(err);
        }
        Ok(session)
    }

    async fn close(mut self) {
        debug!("{} closing session", self.shell.device_addr);
        if !self.client.is_closed() {
            self.shell.exit().await;
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        disconnect(&self.client, &self.shell.device_addr).await;
    }
}

async fn disconnect(client: &Client, device_addr: &str) {
    if let Err(e) = client.disconnect().await {
        debug!("{} disconnect failed: {:?}", device_addr, e);
    }
}

/// Requests a pty and shell and spawns the I/O task bridging it to channels.
async fn open_shell(
    client: &Client,
    platform: &'static Platform,
    device_addr: String,
) -> Result<CliShell, OperationError> {
    let mut channel = client.get_channel().await?;
    channel
        .request_pty(false, "xterm", 800, 600, 0, 0, &[])
        .await?;
    channel.request_shell(false).await?;
    debug!("{} Shell request successful", device_addr);

    let (sender_to_shell, mut receiver_from_user) = mpsc::channel::<String>(256);
    let (sender_to_user, receiver_from_shell) = mpsc::channel::<String>(256);

    let io_task_device_addr = device_addr.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(data) = receiver_from_user.recv() => {
                    if let Err(e) = channel.data(data.as_bytes()).await {
                        debug!("{} Failed to send data to shell: {:?}", io_task_device_addr, e);
                        break;
                    }
                },
                Some(msg) = channel.wait() => {
                    match msg {
                        ChannelMsg::Data { ref data } => {
                            let chunk = String::from_utf8_lossy(data).into_owned();
                            if sender_to_user.send(chunk).await.is_err() {
                                debug!("{} Shell output receiver dropped", io_task_device_addr);
                                break;
                            }
                        }
                        ChannelMsg::ExitStatus { exit_status } => {
                            debug!("{} Shell exited with status code: {}", io_task_device_addr, exit_status);
                            let _ = channel.eof().await;
                            break;
                        }
                        ChannelMsg::Eof => {
                            debug!("{} Shell sent EOF", io_task_device_addr);
                            break;
                        }
                        _ => {}
                    }
                }
                else => break,
            }
        }
        debug!("{} SSH I/O task ended", io_task_device_addr);
    });

    Ok(CliShell::new(
        sender_to_shell,
        receiver_from_shell,
        platform,
        device_addr,
    ))
}

/// Line-oriented driver for a device CLI, speaking over a pair of channels.
struct CliShell {
    sender: Sender<String>,
    recv: Receiver<String>,
    platform: &'static Platform,
    prompt: String,
    device_addr: String,
    exited: bool,
}

impl CliShell {
    fn new(
        sender: Sender<String>,
        recv: Receiver<String>,
        platform: &'static Platform,
        device_addr: String,
    ) -> Self {
        Self {
            sender,
            recv,
            platform,
            prompt: String::new(),
            device_addr,
            exited: false,
        }
    }

    /// Waits for the first prompt, enters privileged mode if a secret is
    /// given, and disables paging. Sends `exit` if any step fails.
    async fn prepare(&mut self, secret: Option<&str>, timeout: Duration) -> Result<(), OperationError> {
        let result = self.prepare_steps(secret, timeout).await;
        if result.is_err() {
            self.exit().await;
        }
        result
    }

    async fn prepare_steps(
        &mut self,
        secret: Option<&str>,
        timeout: Duration,
    ) -> Result<(), OperationError> {
        let banner = match self.read_until_prompt(timeout).await {
            Ok(banner) => banner,
            Err(OperationError::CommandTimeout(_)) => {
                return Err(OperationError::ConnectTimeout(self.device_addr.clone()));
            }
            Err(err) => return Err(err),
        };
        trace!("{} login output: {:?}", self.device_addr, banner);

        if self.platform.is_user_mode(&self.prompt)
            && let Some(secret) = secret
        {
            self.enable(secret, timeout).await?;
        }
        if let Some(paging) = self.platform.paging_command {
            self.send_command(paging, timeout).await?;
        }
        debug!("{} ready at prompt {:?}", self.device_addr, self.prompt);
        Ok(())
    }

    /// Sends the enable command and answers the password prompt.
    async fn enable(&mut self, secret: &str, timeout: Duration) -> Result<(), OperationError> {
        let Some(enable) = self.platform.enable_command else {
            return Ok(());
        };
        self.write_line(enable).await?;
        self.read_until_prompt(timeout).await?;
        if self.platform.is_password_prompt(&self.prompt) {
            self.write_line(secret).await?;
            self.read_until_prompt(timeout).await?;
        }
        if self.platform.is_user_mode(&self.prompt) || self.platform.is_password_prompt(&self.prompt)
        {
            return Err(OperationError::AuthenticationFailed(format!(
                "{} (enable secret rejected)",
                self.device_addr
            )));
        }
        debug!("{} entered privileged mode", self.device_addr);
        Ok(())
    }

    /// Runs commands in order, stopping at the first failure.
    async fn run_plan(&mut self, plan: &[String], timeout: Duration) -> Result<String, OperationError> {
        let mut outputs = Vec::with_capacity(plan.len());
        for command in plan {
            outputs.push(self.send_command(command, timeout).await?);
        }
        Ok(outputs.join("\n"))
    }

    async fn write_line(&self, line: &str) -> Result<(), OperationError> {
        self.sender
            .send(format!("{line}\n"))
            .await
            .map_err(|_| OperationError::ChannelDisconnectError)
    }

    /// Sends one command and returns its cleaned output.
    async fn send_command(&mut self, command: &str, timeout: Duration) -> Result<String, OperationError> {
        while self.recv.try_recv().is_ok() {}

        self.write_line(command).await?;
        let all = self.read_until_prompt(timeout).await?;
        let content = clean_output(&all, command);

        if let Some(line) = self.platform.find_error(&content) {
            return Err(OperationError::CommandRejected {
                command: command.to_string(),
                output: line.to_string(),
            });
        }
        Ok(content)
    }

    async fn read_until_prompt(&mut self, timeout: Duration) -> Result<String, OperationError> {
        let (all, prompt) = read_until_prompt(&mut self.recv, self.platform, timeout).await?;
        self.prompt = prompt;
        Ok(all)
    }

    /// Stops reading and asks the device to end the shell. Idempotent.
    async fn exit(&mut self) {
        if self.exited {
            return;
        }
        self.exited = true;
        self.recv.close();
        if let Err(e) = self.sender.send("exit\n".to_string()).await {
            debug!("{} failed to send exit: {:?}", self.device_addr, e);
        }
    }
}

/// Reads shell output until the unterminated tail matches the prompt.
///
/// Returns the raw output and the trimmed prompt. A password prompt also ends
/// the read; only `enable` answers it. On timeout the partial output is kept in
/// the error.
async fn read_until_prompt(
    recv: &mut Receiver<String>,
    platform: &Platform,
    timeout: Duration,
) -> Result<(String, String), OperationError> {
    let mut buffer = String::new();

    let result = tokio::time::timeout(timeout, async {
        loop {
            let Some(data) = recv.recv().await else {
                return Err(OperationError::ChannelDisconnectError);
            };
            trace!("{:?}", data);
            buffer.push_str(&data);

            let tail = buffer.rsplit('\n').next().unwrap_or_default();
            if platform.is_prompt(tail) || platform.is_password_prompt(tail) {
                return Ok(tail.trim().to_string());
            }
        }
    })
    .await;

    match result {
        Err(_) => Err(OperationError::CommandTimeout(buffer)),
        Ok(Err(err)) => Err(err),
        Ok(Ok(prompt)) => Ok((buffer, prompt)),
    }
}

/// Strips the echoed command and the trailing prompt from raw shell output.
fn clean_output(all: &str, command: &str) -> String {
    let normalized = all.replace("\r\n", "\n").replace('\r', "");
    let mut content = normalized.as_str();

    if let Some(rest) = content.trim_start_matches('\n').strip_prefix(command) {
        content = rest.trim_start_matches('\n');
    }

    let content = match content.rfind('\n') {
        Some(pos) => &content[..pos],
        None => "",
    };
    content.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::task::JoinHandle;

    const SHORT: Duration = Duration::from_millis(200);

    /// A shell wired to a fake device. `banner` is queued before the shell
    /// writes anything; each line the shell writes is answered with the chunks
    /// scripted for that command, if any. Every line received is returned once
    /// the shell goes away.
    fn device_shell(
        device_type: &str,
        banner: &[&str],
        script: Vec<(&'static str, Vec<&'static str>)>,
    ) -> (CliShell, JoinHandle<Vec<String>>) {
        let (to_device, mut device_in) = mpsc::channel::<String>(16);
        let (device_out, from_device) = mpsc::channel::<String>(16);
        for chunk in banner {
            device_out.try_send(chunk.to_string()).expect("queue banner");
        }
        let device = tokio::spawn(async move {
            let mut received = Vec::new();
            while let Some(line) = device_in.recv().await {
                let reply = script
                    .iter()
                    .find(|(command, _)| line.strip_suffix('\n') == Some(*command))
                    .map(|(_, chunks)| chunks.clone())
                    .unwrap_or_default();
                received.push(line);
                for chunk in reply {
                    let _ = device_out.send(chunk.to_string()).await;
                }
            }
            received
        });
        let shell = CliShell::new(
            to_device,
            from_device,
            Platform::for_device_type(device_type),
            "developer@10.10.20.48:22".to_string(),
        );
        (shell, device)
    }

    /// Device output that is already waiting before the shell writes anything.
    fn preloaded(chunks: &[&str]) -> Receiver<String> {
        let (tx, rx) = mpsc::channel::<String>(16);
        for chunk in chunks {
            tx.try_send(chunk.to_string()).expect("queue chunk");
        }
        rx
    }

    #[test]
    fn clean_output_strips_echo_and_prompt() {
        let raw = "show clock\r\n*12:00:01.123 UTC Mon Oct 12 2026\r\nRouter-HQ#";
        assert_eq!(
            clean_output(raw, "show clock"),
            "*12:00:01.123 UTC Mon Oct 12 2026"
        );
    }

    #[test]
    fn clean_output_keeps_multiline_body() {
        let raw = "show ip int brief\nGi0/0 up up\nGi0/1 down down\nRouter#";
        assert_eq!(
            clean_output(raw, "show ip int brief"),
            "Gi0/0 up up\nGi0/1 down down"
        );
    }

    #[test]
    fn clean_output_of_silent_command_is_empty() {
        assert_eq!(clean_output("terminal length 0\r\nRouter#", "terminal length 0"), "");
        assert_eq!(clean_output("Router#", "end"), "");
    }

    #[test]
    fn executor_builder_overrides_defaults() {
        let executor = SshExecutor::new()
            .with_security(ConnectionSecurityOptions::for_level(SecurityLevel::Balanced))
            .with_connect_timeout(Duration::from_secs(5))
            .with_command_timeout(Duration::from_secs(10));
        assert_eq!(executor.security.level, SecurityLevel::Balanced);
        assert_eq!(executor.connect_timeout, Duration::from_secs(5));
        assert_eq!(executor.command_timeout, Duration::from_secs(10));
    }

    #[test]
    fn inactivity_timeout_outlasts_longest_wait() {
        let slow_commands = SshExecutor::new().with_command_timeout(Duration::from_secs(180));
        assert_eq!(slow_commands.inactivity_timeout(), Duration::from_secs(210));

        let slow_login = SshExecutor::new()
            .with_connect_timeout(Duration::from_secs(90))
            .with_command_timeout(Duration::from_secs(10));
        assert_eq!(slow_login.inactivity_timeout(), Duration::from_secs(120));
    }

    #[tokio::test]
    async fn read_joins_prompt_split_across_chunks() {
        let mut rx = preloaded(&["show clock\r\n*12:00:01 UTC\r\nRou", "ter-HQ#"]);
        let ios = Platform::for_device_type("cisco_ios");

        let (all, prompt) = read_until_prompt(&mut rx, ios, SHORT).await.expect("prompt");

        assert_eq!(prompt, "Router-HQ#");
        assert_eq!(clean_output(&all, "show clock"), "*12:00:01 UTC");
    }

    #[tokio::test]
    async fn read_stops_at_password_prompt() {
        let mut rx = preloaded(&["enable\r\nPassword: ", "should stay queued"]);
        let ios = Platform::for_device_type("cisco_ios");

        let (_, prompt) = read_until_prompt(&mut rx, ios, SHORT).await.expect("prompt");

        assert_eq!(prompt, "Password:");
        assert_eq!(rx.try_recv().ok().as_deref(), Some("should stay queued"));
    }

    #[tokio::test]
    async fn read_timeout_keeps_partial_output() {
        let (tx, mut rx) = mpsc::channel::<String>(4);
        tx.send("write memory\r\nBuilding configuration...\r\n".to_string())
            .await
            .expect("queue chunk");
        let ios = Platform::for_device_type("cisco_ios");

        let err = read_until_prompt(&mut rx, ios, Duration::from_millis(50))
            .await
            .expect_err("no prompt arrives");

        match err {
            OperationError::CommandTimeout(partial) => {
                assert!(partial.contains("Building configuration..."))
            }
            other => panic!("unexpected error {other:?}"),
        }
        drop(tx);
    }

    #[tokio::test]
    async fn read_reports_closed_channel_as_disconnect() {
        let mut rx = preloaded(&["Router-HQ uptime is"]);
        let ios = Platform::for_device_type("cisco_ios");

        let err = read_until_prompt(&mut rx, ios, SHORT)
            .await
            .expect_err("sender dropped");

        assert!(matches!(err, OperationError::ChannelDisconnectError));
    }

    #[tokio::test]
    async fn send_command_returns_cleaned_output() {
        let (mut shell, device) = device_shell(
            "cisco_ios",
            &[],
            vec![("show clock", vec!["show clock\r\n", "*12:00:01 UTC\r\nRouter-HQ#"])],
        );

        let output = shell.send_command("show clock", SHORT).await.expect("output");

        assert_eq!(output, "*12:00:01 UTC");
        assert_eq!(shell.prompt, "Router-HQ#");
        drop(shell);
        assert_eq!(device.await.expect("device task"), vec!["show clock\n"]);
    }

    #[tokio::test]
    async fn send_command_turns_error_marker_into_rejection() {
        let (mut shell, _device) = device_shell(
            "cisco_ios",
            &[],
            vec![(
                "interface Gi0/99",
                vec!["interface Gi0/99\r\n% Invalid input detected at '^' marker.\r\nRouter-HQ(config)#"],
            )],
        );

        let err = shell
            .send_command("interface Gi0/99", SHORT)
            .await
            .expect_err("device rejects command");

        match &err {
            OperationError::CommandRejected { command, output } => {
                assert_eq!(command, "interface Gi0/99");
                assert_eq!(output, "% Invalid input detected at '^' marker.");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(err.kind(), crate::error::FailureKind::Command);
    }

    #[tokio::test]
    async fn send_command_timeout_is_a_timeout_failure() {
        let (mut shell, _device) = device_shell(
            "cisco_ios",
            &[],
            vec![("write memory", vec!["write memory\r\nBuilding configuration...\r\n"])],
        );

        let err = shell
            .send_command("write memory", Duration::from_millis(50))
            .await
            .expect_err("prompt never returns");

        assert!(matches!(err, OperationError::CommandTimeout(ref partial) if partial.contains("Building")));
        assert_eq!(err.kind(), crate::error::FailureKind::Timeout);
    }

    #[tokio::test]
    async fn run_plan_stops_at_first_rejected_command() {
        let (mut shell, device) = device_shell(
            "cisco_ios",
            &[],
            vec![
                ("configure terminal", vec!["configure terminal\r\nRouter-HQ(config)#"]),
                ("bogus", vec!["bogus\r\n% Invalid input detected at '^' marker.\r\nRouter-HQ(config)#"]),
                ("end", vec!["end\r\nRouter-HQ#"]),
            ],
        );
        let plan = vec![
            "configure terminal".to_string(),
            "bogus".to_string(),
            "end".to_string(),
        ];

        let err = shell.run_plan(&plan, SHORT).await.expect_err("plan aborted");

        assert!(matches!(err, OperationError::CommandRejected { .. }));
        drop(shell);
        assert_eq!(
            device.await.expect("device task"),
            vec!["configure terminal\n", "bogus\n"]
        );
    }

    #[tokio::test]
    async fn prepare_enters_privileged_mode_and_disables_paging() {
        let (mut shell, device) = device_shell(
            "cisco_ios",
            &["\r\nUser Access Verification\r\n", "\r\nRouter-HQ>"],
            vec![
                ("enable", vec!["enable\r\nPassword: "]),
                ("cisco", vec!["\r\nRouter-HQ#"]),
                ("terminal length 0", vec!["terminal length 0\r\nRouter-HQ#"]),
            ],
        );

        shell.prepare(Some("cisco"), SHORT).await.expect("prepared");

        assert_eq!(shell.prompt, "Router-HQ#");
        drop(shell);
        assert_eq!(
            device.await.expect("device task"),
            vec!["enable\n", "cisco\n", "terminal length 0\n"]
        );
    }

    #[tokio::test]
    async fn prepare_rejected_enable_secret_sends_exit() {
        let (mut shell, device) = device_shell(
            "cisco_ios",
            &["\r\nRouter-HQ>"],
            vec![
                ("enable", vec!["enable\r\nPassword: "]),
                ("wrong", vec!["\r\n% Access denied\r\n\r\nRouter-HQ>"]),
            ],
        );

        let err = shell
            .prepare(Some("wrong"), SHORT)
            .await
            .expect_err("secret rejected");

        assert!(matches!(err, OperationError::AuthenticationFailed(_)));
        shell.exit().await;
        drop(shell);
        assert_eq!(
            device.await.expect("device task"),
            vec!["enable\n", "wrong\n", "exit\n"]
        );
    }

    #[tokio::test]
    async fn prepare_rejected_paging_command_sends_exit() {
        let (mut shell, device) = device_shell(
            "cisco_ios",
            &["\r\nRouter-HQ#"],
            vec![(
                "terminal length 0",
                vec!["terminal length 0\r\n% Invalid input detected at '^' marker.\r\nRouter-HQ#"],
            )],
        );

        let err = shell.prepare(None, SHORT).await.expect_err("paging rejected");

        assert!(matches!(err, OperationError::CommandRejected { .. }));
        drop(shell);
        assert_eq!(
            device.await.expect("device task"),
            vec!["terminal length 0\n", "exit\n"]
        );
    }

    #[tokio::test]
    async fn prepare_without_banner_is_a_connect_timeout_and_sends_exit() {
        let (mut shell, device) = device_shell("cisco_ios", &[], vec![]);

        let err = shell
            .prepare(None, Duration::from_millis(50))
            .await
            .expect_err("no banner");

        assert!(matches!(err, OperationError::ConnectTimeout(_)));
        assert_eq!(err.kind(), crate::error::FailureKind::Connection);
        drop(shell);
        assert_eq!(device.await.expect("device task"), vec!["exit\n"]);
    }

    #[tokio::test]
    async fn unreachable_device_fails_with_connection_class() {
        let executor = SshExecutor::new()
            .with_security(ConnectionSecurityOptions::for_level(SecurityLevel::LegacyCompatible))
            .with_connect_timeout(Duration::from_millis(500));
        let profile = DeviceProfile {
            device_type: "cisco_ios".to_string(),
            host: "127.0.0.1".to_string(),
            username: "developer".to_string(),
            password: "pw".to_string(),
            secret: None,
            port: 1,
        };
        let err = executor
            .execute(ItemContext {
                id: profile.host.clone(),
                payload: DeviceJob {
                    profile,
                    operation: DeviceOperation::Show {
                        commands: vec!["show version".to_string()],
                    },
                },
            })
            .await
            .expect_err("nothing listens on port 1");
        assert_eq!(err.kind(), crate::error::FailureKind::Connection);
    }
}
