// ABOUTME: Shared configuration surface for sandrelay packages
// ABOUTME: Re-exports the environment variable name constants

pub mod constants;
