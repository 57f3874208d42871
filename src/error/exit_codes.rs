use crate::error::LockyardError;

pub fn get_exit_code(error: &LockyardError) -> i32 {
    match error {
        LockyardError::InvalidConfig(_) | LockyardError::ConfigError(_) => 2,

        LockyardError::OwnershipViolation { .. } => 3,

        LockyardError::StaleLock { .. } => 4,

        LockyardError::LockingTimeout { .. } => 5,

        LockyardError::Unsupported(_) => 6,

        LockyardError::Connectivity(_)
        | LockyardError::Store(_)
        | LockyardError::StoreRejected(_) => 20,

        LockyardError::Interrupted { .. } => 130, // Conventional SIGINT exit code

        _ => 1,
    }
}
