//! Capability checker - 순수 권한 판정기
//!
//! 매니페스트에서 읽은 토큰 집합을 플러그인 등록 시 설치하고, 해제 시 제거한다.
//! I/O 없음 (거부 시 로그만 남긴다).

use super::tokens::required_capability;
use crate::{Error, Result};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// 플러그인별 권한 부여 테이블
#[derive(Debug, Default)]
pub struct CapabilityChecker {
    /// plugin id -> 토큰 집합
    grants: RwLock<HashMap<String, HashSet<String>>>,
}

impl CapabilityChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 플러그인 권한 설치 (기존 부여는 교체)
    pub fn register<I, S>(&self, plugin_id: &str, tokens: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: HashSet<String> = tokens.into_iter().map(Into::into).collect();
        debug!("Granting {} capabilities to {}", set.len(), plugin_id);
        self.grants.write().insert(plugin_id.to_string(), set);
    }

    /// 플러그인 권한 제거
    pub fn unregister(&self, plugin_id: &str) -> bool {
        let removed = self.grants.write().remove(plugin_id).is_some();
        if removed {
            debug!("Revoked capabilities of {}", plugin_id);
        }
        removed
    }

    /// 등록 여부
    pub fn is_registered(&self, plugin_id: &str) -> bool {
        self.grants.read().contains_key(plugin_id)
    }

    /// 권한 보유 여부 (알 수 없는 플러그인은 거부)
    pub fn has_capability(&self, plugin_id: &str, token: &str) -> bool {
        let grants = self.grants.read();
        match grants.get(plugin_id) {
            Some(set) => {
                let granted = set.contains(token);
                if !granted {
                    warn!("Plugin {} lacks capability {}", plugin_id, token);
                }
                granted
            }
            None => {
                warn!("Capability check for unknown plugin {} ({})", plugin_id, token);
                false
            }
        }
    }

    /// 작업 수행 가능 여부를 타입 있는 에러로 판정
    ///
    /// 특권 작업이 아니면 항상 Ok. 알 수 없는 플러그인은 `UnknownPlugin`,
    /// 토큰이 없으면 `PermissionDenied`.
    pub fn check_operation(&self, plugin_id: &str, operation: &str) -> Result<()> {
        let Some(token) = required_capability(operation) else {
            return Ok(());
        };
        self.check_token(plugin_id, token)
    }

    /// 토큰 하나를 타입 있는 에러로 판정
    pub fn check_token(&self, plugin_id: &str, token: &str) -> Result<()> {
        if !self.is_registered(plugin_id) {
            warn!("Denied {} for unknown plugin {}", token, plugin_id);
            return Err(Error::UnknownPlugin(plugin_id.to_string()));
        }
        if self.has_capability(plugin_id, token) {
            Ok(())
        } else {
            Err(Error::PermissionDenied(format!(
                "plugin {} requires capability {}",
                plugin_id, token
            )))
        }
    }

    /// 현재 부여된 토큰 목록 (정렬)
    pub fn grants_of(&self, plugin_id: &str) -> Vec<String> {
        let mut tokens: Vec<String> = self
            .grants
            .read()
            .get(plugin_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        tokens.sort();
        tokens
    }

    /// 등록된 플러그인 수
    pub fn len(&self) -> usize {
        self.grants.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::tokens;

    #[test]
    fn test_unknown_plugin_denied() {
        let checker = CapabilityChecker::new();
        assert!(!checker.has_capability("nobody", tokens::TERMINAL_WRITE));
        assert!(matches!(
            checker.check_operation("nobody", "writeTerminal"),
            Err(Error::UnknownPlugin(_))
        ));
    }

    #[test]
    fn test_grant_revoke_returns_to_denied() {
        let checker = CapabilityChecker::new();
        let before = checker.has_capability("a", tokens::TERMINAL_WRITE);

        checker.register("a", [tokens::TERMINAL_WRITE]);
        assert!(checker.has_capability("a", tokens::TERMINAL_WRITE));

        checker.unregister("a");
        assert_eq!(checker.has_capability("a", tokens::TERMINAL_WRITE), before);
        assert!(checker.is_empty());
    }

    #[test]
    fn test_check_operation() {
        let checker = CapabilityChecker::new();
        checker.register("a", [tokens::UI_BUBBLE]);

        assert!(checker.check_operation("a", "showBubble").is_ok());
        assert!(checker.check_operation("a", "emit").is_ok());
        assert!(matches!(
            checker.check_operation("a", "writeTerminal"),
            Err(Error::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_register_replaces_previous_grant() {
        let checker = CapabilityChecker::new();
        checker.register("a", [tokens::SERVICE_CALL, tokens::SERVICE_REGISTER]);
        checker.register("a", [tokens::SERVICE_CALL]);

        assert_eq!(checker.grants_of("a"), vec![tokens::SERVICE_CALL.to_string()]);
        assert!(!checker.has_capability("a", tokens::SERVICE_REGISTER));
    }
}
