//! Resource kinds understood by the bundled engines
//!
//! Kinds are plain strings on the wire; these constants keep the topology
//! builder and the local engine in agreement.

pub const VPC: &str = "ec2:vpc";
pub const INTERNET_GATEWAY: &str = "ec2:internet-gateway";
pub const SUBNET: &str = "ec2:subnet";
pub const ROUTE_TABLE: &str = "ec2:route-table";
pub const ROUTE_TABLE_ASSOCIATION: &str = "ec2:route-table-association";
pub const SECURITY_GROUP: &str = "ec2:security-group";
pub const INSTANCE: &str = "ec2:instance";
pub const LAUNCH_TEMPLATE: &str = "ec2:launch-template";
pub const DB_SUBNET_GROUP: &str = "rds:subnet-group";
pub const DB_INSTANCE: &str = "rds:instance";
pub const LOAD_BALANCER: &str = "elb:load-balancer";
pub const TARGET_GROUP: &str = "elb:target-group";
pub const LISTENER: &str = "elb:listener";
pub const AUTOSCALING_GROUP: &str = "autoscaling:group";
pub const FUNCTION: &str = "lambda:function";
pub const FUNCTION_PERMISSION: &str = "lambda:permission";
pub const EVENT_RULE: &str = "events:rule";
pub const EVENT_TARGET: &str = "events:target";
pub const DNS_RECORD: &str = "route53:record";
pub const RANDOM_PASSWORD: &str = "random:password";

/// Short ID prefix used for engine-assigned identifiers
pub fn id_prefix(kind: &str) -> &str {
    match kind {
        VPC => "vpc",
        INTERNET_GATEWAY => "igw",
        SUBNET => "subnet",
        ROUTE_TABLE => "rtb",
        ROUTE_TABLE_ASSOCIATION => "rtbassoc",
        SECURITY_GROUP => "sg",
        INSTANCE => "i",
        LAUNCH_TEMPLATE => "lt",
        DB_SUBNET_GROUP => "dbsubnet",
        DB_INSTANCE => "db",
        LOAD_BALANCER => "lb",
        TARGET_GROUP => "tg",
        LISTENER => "listener",
        AUTOSCALING_GROUP => "asg",
        FUNCTION => "fn",
        FUNCTION_PERMISSION => "perm",
        EVENT_RULE => "rule",
        EVENT_TARGET => "target",
        DNS_RECORD => "rec",
        RANDOM_PASSWORD => "pwd",
        other => other.rsplit(':').next().unwrap_or(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_prefix() {
        assert_eq!(id_prefix(VPC), "vpc");
        assert_eq!(id_prefix(DB_INSTANCE), "db");
        assert_eq!(id_prefix("s3:bucket"), "bucket");
        assert_eq!(id_prefix("plain"), "plain");
    }
}
