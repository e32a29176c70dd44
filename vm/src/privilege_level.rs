#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PrivilegeLevel {
    User = 0,
    Kernel = 1,
}

impl PrivilegeLevel {
    pub fn is_privileged(self) -> bool {
        self == PrivilegeLevel::Kernel
    }
}
