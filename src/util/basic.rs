// Plain string error, for low-level helpers where a full error type
// would be overkill. The engine proper wraps these into EngineError.
pub type SError = String;
