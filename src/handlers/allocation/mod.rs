pub mod batch;
pub mod fr;
pub mod stage;

pub use fr::get as fr_get;
pub use fr::post as fr_post;

pub use stage::post as stage_post;

pub use batch::engineer_referral;
pub use batch::hold;
pub use batch::release;
