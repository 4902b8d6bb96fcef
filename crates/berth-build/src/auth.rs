//! SSHフォワードの解決
//!
//! マニフェストと `--ssh` の宣言をマージし、ビルドに渡すソケット/鍵パスを決定します。

use crate::env::Environment;
use crate::error::{BuildError, Result};
use crate::unit::AuthForward;
use berth_core::{SshSource, SshSpec};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// SSHエージェントソケットを示す環境変数
pub const SSH_AUTH_SOCK: &str = "SSH_AUTH_SOCK";

pub struct AuthForwarder;

impl AuthForwarder {
    /// フォワード宣言を解決
    ///
    /// 同じIDの宣言はCLI側が優先され、それ以外は両方の和集合になる（ID順）。
    /// エージェント形式は `SSH_AUTH_SOCK` が空・未設定・接続不能の場合にここで失敗する。
    pub fn resolve(
        declared: &[SshSpec],
        cli: &[SshSpec],
        env: &Environment,
    ) -> Result<Vec<AuthForward>> {
        let mut merged: BTreeMap<&str, &SshSpec> = BTreeMap::new();
        for spec in declared.iter().chain(cli) {
            merged.insert(spec.id.as_str(), spec);
        }

        merged
            .into_values()
            .map(|spec| Self::resolve_one(spec, env))
            .collect()
    }

    fn resolve_one(spec: &SshSpec, env: &Environment) -> Result<AuthForward> {
        let socket = match &spec.source {
            // 鍵ファイルの存在確認はバックエンドに任せる
            SshSource::Path(path) => path.clone(),
            SshSource::Agent => Self::agent_socket(env)?,
        };

        tracing::debug!("SSH forward '{}' -> {}", spec.id, socket.display());
        Ok(AuthForward {
            id: spec.id.clone(),
            socket,
        })
    }

    /// 環境変数からエージェントソケットを取得し、接続可能か確認
    fn agent_socket(env: &Environment) -> Result<PathBuf> {
        let socket = env
            .get(SSH_AUTH_SOCK)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                BuildError::InvalidAuthSocket(format!(
                    "invalid empty ssh agent socket: make sure {} is set",
                    SSH_AUTH_SOCK
                ))
            })?;

        let path = PathBuf::from(socket);
        Self::check_live(&path)?;
        Ok(path)
    }

    #[cfg(unix)]
    fn check_live(path: &Path) -> Result<()> {
        use std::os::unix::net::UnixStream;

        UnixStream::connect(path).map(drop).map_err(|e| {
            BuildError::InvalidAuthSocket(format!(
                "invalid ssh agent socket {}: {}",
                path.display(),
                e
            ))
        })
    }

    #[cfg(not(unix))]
    fn check_live(path: &Path) -> Result<()> {
        if path.exists() {
            Ok(())
        } else {
            Err(BuildError::InvalidAuthSocket(format!(
                "invalid ssh agent socket {}: not found",
                path.display()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_agent_without_env_fails() {
        let err = AuthForwarder::resolve(&[], &[SshSpec::parse("")], &Environment::new())
            .unwrap_err();

        assert!(matches!(err, BuildError::InvalidAuthSocket(_)));
        assert_eq!(
            err.to_string(),
            "invalid empty ssh agent socket: make sure SSH_AUTH_SOCK is set"
        );
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_default_agent_with_empty_env_fails() {
        let env: Environment = [(SSH_AUTH_SOCK, "")].into_iter().collect();
        let err = AuthForwarder::resolve(&[SshSpec::agent("default")], &[], &env).unwrap_err();
        assert!(matches!(err, BuildError::InvalidAuthSocket(_)));
    }

    #[test]
    fn test_agent_socket_not_listening_fails() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("agent.sock");
        let env: Environment = [(SSH_AUTH_SOCK, sock.to_str().unwrap())]
            .into_iter()
            .collect();

        let err = AuthForwarder::resolve(&[SshSpec::agent("default")], &[], &env).unwrap_err();
        assert!(matches!(err, BuildError::InvalidAuthSocket(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_live_agent_socket() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("agent.sock");
        let _listener = std::os::unix::net::UnixListener::bind(&sock).unwrap();
        let env: Environment = [(SSH_AUTH_SOCK, sock.to_str().unwrap())]
            .into_iter()
            .collect();

        let forwards = AuthForwarder::resolve(&[SshSpec::agent("default")], &[], &env).unwrap();
        assert_eq!(
            forwards,
            vec![AuthForward {
                id: "default".to_string(),
                socket: sock
            }]
        );
    }

    #[test]
    fn test_named_forward_not_checked() {
        let forwards = AuthForwarder::resolve(
            &[],
            &[SshSpec::parse("fake-ssh=./does/not/exist")],
            &Environment::new(),
        )
        .unwrap();

        assert_eq!(forwards.len(), 1);
        assert_eq!(forwards[0].id, "fake-ssh");
        assert_eq!(forwards[0].socket, PathBuf::from("./does/not/exist"));
    }

    #[test]
    fn test_cli_overrides_manifest_by_id() {
        let declared = vec![
            SshSpec::parse("deploy=/manifest/key"),
            SshSpec::parse("github=/manifest/github"),
        ];
        let cli = vec![
            SshSpec::parse("deploy=/cli/key"),
            SshSpec::parse("extra=/cli/extra"),
        ];

        let forwards = AuthForwarder::resolve(&declared, &cli, &Environment::new()).unwrap();
        let pairs: Vec<_> = forwards
            .iter()
            .map(|f| (f.id.as_str(), f.socket.to_str().unwrap()))
            .collect();

        assert_eq!(
            pairs,
            vec![
                ("deploy", "/cli/key"),
                ("extra", "/cli/extra"),
                ("github", "/manifest/github"),
            ]
        );
    }

    #[test]
    fn test_cli_path_overrides_manifest_agent() {
        // マニフェストの default エージェントをCLIの鍵ファイルで置き換えれば環境変数は不要
        let forwards = AuthForwarder::resolve(
            &[SshSpec::agent("default")],
            &[SshSpec::parse("default=/keys/id_rsa")],
            &Environment::new(),
        )
        .unwrap();
        assert_eq!(forwards[0].socket, PathBuf::from("/keys/id_rsa"));
    }
}
