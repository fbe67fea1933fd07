use super::*;

/// CLI conventions of one device family.
pub struct Platform {
    /// Device type key used in inventories.
    pub name: &'static str,
    /// Disables output paging for the session.
    pub paging_command: Option<&'static str>,
    /// Raises privilege from user mode when a secret is configured.
    pub enable_command: Option<&'static str>,
    pub config_enter: Option<&'static str>,
    /// Applies staged configuration (candidate-config platforms only).
    pub commit_command: Option<&'static str>,
    pub config_exit: Option<&'static str>,
    prompt: Regex,
    password_prompt: Regex,
    errors: RegexSet,
}

fn compile(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(re) => re,
        Err(err) => panic!("invalid built-in prompt regex {pattern}: {err}"),
    }
}

fn compile_set(patterns: &[&str]) -> RegexSet {
    match RegexSet::new(patterns) {
        Ok(set) => set,
        Err(err) => panic!("invalid built-in error regex set: {err}"),
    }
}

static CISCO_IOS: Lazy<Platform> = Lazy::new(|| Platform {
    name: "cisco_ios",
    paging_command: Some("terminal length 0"),
    enable_command: Some("enable"),
    config_enter: Some("configure terminal"),
    commit_command: None,
    config_exit: Some("end"),
    prompt: compile(r"^[^\s#>]+(\([^)]+\))?[>#]\s*$"),
    password_prompt: compile(r"(?i)^(enable )?password:\s*$"),
    errors: compile_set(&[
        r"^% ?Invalid input detected",
        r"^% ?Incomplete command",
        r"^% ?Ambiguous command",
        r"^% ?Unknown command",
        r"^Command authorization failed",
        r"^Command rejected:",
        r"^ERROR:",
    ]),
});

static CISCO_XR: Lazy<Platform> = Lazy::new(|| Platform {
    name: "cisco_xr",
    paging_command: Some("terminal length 0"),
    enable_command: None,
    config_enter: Some("configure terminal"),
    commit_command: Some("commit"),
    config_exit: Some("end"),
    prompt: compile(r"^(RP/\S+:)?[^\s#]+(\([^)]+\))?#\s*$"),
    password_prompt: compile(r"(?i)^password:\s*$"),
    errors: compile_set(&[
        r"^% ?Invalid input detected",
        r"^% ?Incomplete command",
        r"^% ?Ambiguous command",
        r"^% ?Failed to commit",
        r"^!!% ",
    ]),
});

static CISCO_NXOS: Lazy<Platform> = Lazy::new(|| Platform {
    name: "cisco_nxos",
    paging_command: Some("terminal length 0"),
    enable_command: None,
    config_enter: Some("configure terminal"),
    commit_command: None,
    config_exit: Some("end"),
    prompt: compile(r"^[^\s#]+(\([^)]+\))?#\s*$"),
    password_prompt: compile(r"(?i)^password:\s*$"),
    errors: compile_set(&[
        r"^% ?Invalid command",
        r"^% ?Incomplete command",
        r"^% ?Ambiguous command",
        r"^% ?Permission denied",
    ]),
});

static JUNIPER_JUNOS: Lazy<Platform> = Lazy::new(|| Platform {
    name: "juniper_junos",
    paging_command: Some("set cli screen-length 0"),
    enable_command: None,
    config_enter: Some("configure"),
    commit_command: Some("commit and-quit"),
    config_exit: None,
    prompt: compile(r"^(\{\S+\}\s*)?\S+@\S+[>#%]\s*$"),
    password_prompt: compile(r"(?i)^password:\s*$"),
    errors: compile_set(&[
        r"^error:",
        r"^syntax error",
        r"^unknown command",
        r"^\s*\^$",
    ]),
});

static GENERIC: Lazy<Platform> = Lazy::new(|| Platform {
    name: "generic",
    paging_command: None,
    enable_command: None,
    config_enter: None,
    commit_command: None,
    config_exit: None,
    prompt: compile(r"[>#$%]\s*$"),
    password_prompt: compile(r"(?i)password:\s*$"),
    errors: compile_set(&[r"^% ?Invalid", r"^(?i)error:"]),
});

impl Platform {
    /// Looks up the conventions for an inventory `device_type`
    /// (case-insensitive), falling back to [`Platform::generic`].
    pub fn for_device_type(device_type: &str) -> &'static Platform {
        match device_type.trim().to_ascii_lowercase().as_str() {
            "cisco_ios" | "cisco_xe" | "cisco_ios_xe" => &*CISCO_IOS,
            "cisco_xr" | "cisco_ios_xr" => &*CISCO_XR,
            "cisco_nxos" => &*CISCO_NXOS,
            "juniper" | "juniper_junos" => &*JUNIPER_JUNOS,
            other => {
                debug!("Unknown device type '{other}', using generic platform");
                Self::generic()
            }
        }
    }

    pub fn generic() -> &'static Platform {
        &*GENERIC
    }

    /// True if `line` (the unterminated tail of the output) is a CLI prompt.
    pub fn is_prompt(&self, line: &str) -> bool {
        self.prompt.is_match(line.trim_start_matches(['\r', '\n']))
    }

    pub fn is_password_prompt(&self, line: &str) -> bool {
        self.password_prompt
            .is_match(line.trim_start_matches(['\r', '\n']).trim_end())
    }

    /// True if the prompt shows user (unprivileged) mode.
    pub fn is_user_mode(&self, prompt: &str) -> bool {
        self.enable_command.is_some() && prompt.trim_end().ends_with('>')
    }

    /// First output line carrying an error marker.
    pub fn find_error<'a>(&self, output: &'a str) -> Option<&'a str> {
        output
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .find(|line| self.errors.is_match(line))
    }

    /// The command sequence sent for `operation`, including mode changes.
    pub fn command_plan(&self, operation: &DeviceOperation) -> Vec<String> {
        match operation {
            DeviceOperation::Show { commands } => commands.clone(),
            DeviceOperation::Configure { commands } => {
                let mut plan = Vec::with_capacity(commands.len() + 3);
                plan.extend(self.config_enter.map(str::to_string));
                plan.extend(commands.iter().cloned());
                plan.extend(self.commit_command.map(str::to_string));
                plan.extend(self.config_exit.map(str::to_string));
                plan
            }
        }
    }
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform").field("name", &self.name).finish()
    }
}
