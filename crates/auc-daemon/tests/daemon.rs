use std::sync::Arc;
use std::time::Duration;

use auc_daemon::{Daemon, DaemonConfig};
use auc_proto::DealProposal;
use auc_relaymgr::RelayState;
use auc_signer::{validate_deal_proposal_signature, SignerConfig, SignerError, SigningClient};
use auc_transport::tcp::TcpHost;
use auc_transport::{Connectedness, Host, PeerId};
use auc_wallet::{address_of, parse_secret_key, Ed25519Verifier};

const TOKEN: &str = "daemon-token";
const WALLET_KEY: &str = "0909090909090909090909090909090909090909090909090909090909090909";

fn config() -> DaemonConfig {
    DaemonConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        auth_token: TOKEN.into(),
        wallet_keys: vec![WALLET_KEY.into()],
        ..DaemonConfig::default()
    }
}

fn wallet_address() -> String {
    address_of(&parse_secret_key(WALLET_KEY).unwrap())
}

async fn client_for(daemon: &Daemon) -> (TcpHost, SigningClient) {
    let host = TcpHost::listen(PeerId::new("auctioneer").unwrap(), "127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let target = daemon.peer_addr();
    let socket = match target.addr {
        auc_transport::NetAddr::Ip(addr) => addr,
        other => panic!("unexpected daemon address {}", other),
    };
    host.add_peer_addr(socket, target.peer);
    let client = SigningClient::new(
        Arc::new(host.clone()),
        Arc::new(Ed25519Verifier),
        SignerConfig::default(),
    );
    (host, client)
}

#[tokio::test]
async fn test_signs_deal_proposal_over_tcp() {
    let daemon = Daemon::start(config()).await.unwrap();
    assert_eq!(daemon.wallet_addresses(), &[wallet_address()]);
    assert!(daemon.relayed_addr().is_none());
    assert!(daemon.relay_state().is_none());

    let (host, client) = client_for(&daemon).await;
    let proposal = DealProposal {
        piece_cid: "baga6ea4seaqjaxwnevzjbdjqgzmpwhjcqlxqtc6kxeg3swkqylztc3tkaqqiela".into(),
        piece_size: 34_359_738_368,
        verified_deal: true,
        client: wallet_address(),
        provider: "f01234".into(),
        label: "auction-7".into(),
        start_epoch: 100,
        end_epoch: 200,
        storage_price_per_epoch: "0".into(),
        provider_collateral: "5".into(),
        client_collateral: "0".into(),
    };

    let signature = client
        .request_deal_proposal_signature(daemon.peer_id(), TOKEN, &proposal)
        .await
        .unwrap();
    validate_deal_proposal_signature(&Ed25519Verifier, &proposal, &signature).unwrap();

    let err = client
        .request_deal_proposal_signature(daemon.peer_id(), "wrong", &proposal)
        .await
        .unwrap_err();
    assert!(matches!(err, SignerError::Remote(ref m) if m == "invalid auth token"));

    let stats = daemon.stats();
    assert_eq!(stats.received, 2);
    assert_eq!(stats.signed, 1);
    assert_eq!(stats.rejected, 1);

    host.close();
    daemon.shutdown().await;
}

#[tokio::test]
async fn test_signs_deal_status_over_tcp() {
    let daemon = Daemon::start(config()).await.unwrap();
    let (host, client) = client_for(&daemon).await;

    let payload = b"deal-status:bafyreigdmqpykrgxyaxtlafqpqhzrb7qy2rh75nldvfd4tucqmqqme5yje";
    let signature = client
        .request_deal_status_signature(daemon.peer_id(), TOKEN, &wallet_address(), payload)
        .await
        .unwrap();
    assert_eq!(signature.len(), 64);

    host.close();
    daemon.shutdown().await;
}

#[tokio::test]
async fn test_stays_connected_to_relay() {
    let relay = TcpHost::listen(PeerId::new("relay").unwrap(), "127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let mut cfg = config();
    cfg.relay_addr = Some(relay.peer_addr().to_string());

    let daemon = Daemon::start(cfg).await.unwrap();
    assert_eq!(daemon.relay_state(), Some(RelayState::Connected));

    let relayed = daemon.relayed_addr().unwrap();
    assert_eq!(relayed.relay, relay.peer_addr());
    assert_eq!(&relayed.target, daemon.peer_id());
    assert!(relayed
        .to_string()
        .ends_with(&format!("/p2p-circuit/p2p/{}", daemon.peer_id())));
    // the relay registers its end of the link right after acking it
    for _ in 0..100 {
        if relay.connectedness(daemon.peer_id()) == Connectedness::Connected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(relay.connectedness(daemon.peer_id()), Connectedness::Connected);

    daemon.shutdown().await;
    relay.close();
}

#[tokio::test]
async fn test_start_fails_when_relay_unreachable() {
    let relay = TcpHost::listen(PeerId::new("relay").unwrap(), "127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = relay.peer_addr().to_string();
    relay.close();
    // give the listener a moment to drop
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut cfg = config();
    cfg.relay_addr = Some(addr);
    assert!(Daemon::start(cfg).await.is_err());
}
