//! Bevy test app builders.

use bevy::prelude::*;
use tendon_ik::{IkRig2D, IkRig3D, TendonIkPlugin};

/// Create an app with only [`TendonIkPlugin`] and empty rigs.
pub fn ik_test_app() -> App {
    let mut app = App::new();
    app.add_plugins(TendonIkPlugin);
    app.finish();
    app.cleanup();
    app
}

/// Create an app with [`TendonIkPlugin`] and the given rigs installed.
pub fn ik_test_app_with_rigs(rig_2d: IkRig2D, rig_3d: IkRig3D) -> App {
    let mut app = ik_test_app();
    app.insert_resource(rig_2d);
    app.insert_resource(rig_3d);
    app
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tendon_ik::LastTickReports;

    #[test]
    fn ik_app_builds() {
        let app = ik_test_app();
        assert!(app.world().get_resource::<IkRig2D>().is_some());
        assert!(app.world().get_resource::<LastTickReports>().is_some());
    }

    #[test]
    fn installed_rigs_survive_updates() {
        let rig = crate::rig::chain_2d(&[1.0, 1.0]);
        let mut app = ik_test_app_with_rigs(rig.into_ik_rig(), IkRig3D::default());
        app.update();
        app.update();
        assert_eq!(app.world().resource::<IkRig2D>().skeleton.len(), 3);
    }
}
