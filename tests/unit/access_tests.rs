// Cluster access control matrix

use warren::access::{check_cluster_callable, require_admin, visible_clusters};
use warren::auth::Principal;
use warren::error::AccessError;
use warren::model::{ClusterConnection, NewCluster, Role, UserId};

fn principal(role: Role) -> Principal {
    Principal {
        user_id: UserId::new(),
        username: "caller".to_string(),
        role,
    }
}

fn cluster(name: &str, active: bool, assigned: &[UserId]) -> ClusterConnection {
    let mut cluster = NewCluster {
        name: name.to_string(),
        description: None,
        api_url: "http://rabbit:15672".to_string(),
        username: "guest".to_string(),
        secret: "guest".to_string(),
        active,
    }
    .into_cluster();
    cluster.assigned_users.extend(assigned.iter().copied());
    cluster
}

#[test]
fn test_callable_matrix() {
    let admin = principal(Role::Admin);
    let user = principal(Role::User);

    let cases = [
        // (principal, active, assigned, expected)
        (&admin, true, false, Ok(())),
        (&admin, false, false, Err(AccessError::ClusterInactive)),
        (&user, true, true, Ok(())),
        (&user, false, true, Err(AccessError::ClusterInactive)),
        (&user, true, false, Err(AccessError::Forbidden)),
        // Assignment is checked before activity
        (&user, false, false, Err(AccessError::Forbidden)),
    ];

    for (who, active, assigned, expected) in cases {
        let members: Vec<UserId> = if assigned { vec![who.user_id] } else { Vec::new() };
        let c = cluster("prod", active, &members);
        assert_eq!(
            check_cluster_callable(who, &c),
            expected,
            "role {:?} active {} assigned {}",
            who.role,
            active,
            assigned
        );
    }
}

#[test]
fn test_visible_clusters_for_user_and_admin() {
    let admin = principal(Role::Admin);
    let user = principal(Role::User);
    let clusters = vec![
        cluster("a", true, &[user.user_id]),
        cluster("b", true, &[]),
        cluster("c", false, &[user.user_id]),
    ];

    let names = |list: Vec<ClusterConnection>| -> Vec<String> {
        list.into_iter().map(|c| c.name).collect()
    };
    assert_eq!(names(visible_clusters(&admin, clusters.clone())), vec!["a", "b", "c"]);
    // Inactive assigned clusters stay visible
    assert_eq!(names(visible_clusters(&user, clusters)), vec!["a", "c"]);
}

#[test]
fn test_require_admin() {
    assert!(require_admin(&principal(Role::Admin)).is_ok());
    assert_eq!(
        require_admin(&principal(Role::User)),
        Err(AccessError::AdminRequired)
    );
}
